use log::{info, warn};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::config::Config;
use crate::download::{DownloadStatus, Downloader};
use crate::page::PageSource;
use crate::store::Store;

/// Terminal state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// Target record count reached; resume state cleared.
    TargetReached,
    /// Every page fetched without reaching the target; resume state cleared.
    PagesExhausted,
    /// External interrupt; dataset snapshot saved, cursor left for resume.
    Interrupted,
}

/// The sequential control loop: fetch, filter, accumulate, download,
/// checkpoint, delay. Generic over the page source so tests can drive it
/// without a network.
pub struct Harvester<S> {
    source: S,
    downloader: Downloader,
    store: Store,
    cfg: Config,
    interrupted: Arc<AtomicBool>,
}

impl<S: PageSource> Harvester<S> {
    pub fn new(
        source: S,
        downloader: Downloader,
        store: Store,
        cfg: Config,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Harvester {
            source,
            downloader,
            store,
            cfg,
            interrupted,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run(&mut self) -> anyhow::Result<HarvestOutcome> {
        let start_page = self.store.read_cursor();
        if start_page > 1 {
            info!("断点续爬: resuming from page {}", start_page);
        } else {
            info!(
                "first run: {} pages, target {} records",
                self.cfg.max_page, self.cfg.target_count
            );
        }

        let mut reached_target = false;
        for page in start_page..=self.cfg.max_page {
            // Interrupts are observed at iteration granularity only; an
            // in-flight download runs to completion first.
            if self.interrupted.load(Ordering::SeqCst) {
                warn!(
                    "interrupted, saving {} records without advancing the cursor",
                    self.store.len()
                );
                self.store.write_dataset()?;
                return Ok(HarvestOutcome::Interrupted);
            }

            match self.source.fetch_page(page).await {
                Err(err) => {
                    // The client already retried transient failures with
                    // backoff; the page is skipped, not retried in place.
                    warn!("page {} fetch failed, skipping: {:#}", page, err);
                    self.pause().await;
                    continue;
                }
                Ok(records) => {
                    let mut added = 0usize;
                    for record in records {
                        let pdf_url = record.pdf_url.clone();
                        let pdf_name = record.pdf_name.clone();
                        self.store.append(record);
                        added += 1;
                        let status = self.downloader.download(pdf_url.as_deref(), &pdf_name).await;
                        match status {
                            DownloadStatus::Success | DownloadStatus::AlreadyExists => {
                                info!("{}: {}.pdf", status, pdf_name)
                            }
                            DownloadStatus::NoUrl | DownloadStatus::Failed(_) => {
                                warn!("{}: {}", status, pdf_name)
                            }
                        }
                        if self.store.len() >= self.cfg.target_count {
                            reached_target = true;
                            break;
                        }
                    }
                    info!(
                        "page {}: {} new records, {} accumulated",
                        page,
                        added,
                        self.store.len()
                    );
                }
            }

            if reached_target || page % self.cfg.batch_size == 0 || page == self.cfg.max_page {
                self.store.checkpoint(page + 1)?;
                info!("checkpoint written, next run starts at page {}", page + 1);
            }

            self.pause().await;
            if reached_target {
                break;
            }
        }

        self.store.finalize()?;
        if reached_target {
            info!("target reached: {} records", self.store.len());
            Ok(HarvestOutcome::TargetReached)
        } else {
            info!(
                "all {} pages fetched: {} records",
                self.cfg.max_page,
                self.store.len()
            );
            Ok(HarvestOutcome::PagesExhausted)
        }
    }

    /// The rate limiter: a uniform random delay between pages, applied
    /// whether the page succeeded, failed or triggered the stop.
    async fn pause(&self) {
        let secs = rand::thread_rng().gen_range(self.cfg.min_delay_secs..=self.cfg.max_delay_secs);
        sleep(Duration::from_secs_f64(secs)).await;
    }
}
