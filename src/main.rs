use anyhow::Context;
use log::{info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

use crate::client::ReqClient;
use crate::config::Config;
use crate::download::Downloader;
use crate::driver::{HarvestOutcome, Harvester};
use crate::page::SsePageSource;
use crate::store::Store;

mod client;
mod config;
mod download;
mod driver;
mod page;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "crawler.toml".to_owned());
    let cfg = Config::load(Path::new(&cfg_path))?;
    std::fs::create_dir_all(&cfg.save_dir)
        .with_context(|| format!("create {}", cfg.save_dir.display()))?;
    std::fs::create_dir_all(cfg.pdf_dir())
        .with_context(|| format!("create {}", cfg.pdf_dir().display()))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    let client = ReqClient::new(cfg.retry_times, &cfg.referer)?;
    let source = SsePageSource::new(client.clone(), &cfg);
    let downloader = Downloader::new(
        client,
        cfg.pdf_dir(),
        Duration::from_secs(cfg.download_timeout_secs),
    );
    let store = Store::new(cfg.dataset_path(), cfg.cursor_path());
    let mut harvester = Harvester::new(source, downloader, store, cfg.clone(), interrupted);

    match harvester.run().await? {
        HarvestOutcome::TargetReached => {
            info!("harvest complete: {} records", harvester.store().len())
        }
        HarvestOutcome::PagesExhausted => info!(
            "pages exhausted at {} records (target {})",
            harvester.store().len(),
            cfg.target_count
        ),
        HarvestOutcome::Interrupted => warn!(
            "interrupted at {} records; rerun to resume",
            harvester.store().len()
        ),
    }
    info!("dataset: {}", cfg.dataset_path().display());
    info!("pdf dir: {}", cfg.pdf_dir().display());
    Ok(())
}
