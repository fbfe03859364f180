use anyhow::{ensure, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration, loaded from an optional TOML file. Every field
/// has a default matching the production harvest of the SSE company-bond
/// bulletin board, so a missing file means "run with the usual settings".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the dataset, the resume cursor and the pdf subdir.
    pub save_dir: PathBuf,
    /// Subdirectory of `save_dir` receiving downloaded attachments.
    pub pdf_subdir: String,
    /// Total number of pages the upstream reports for the query.
    pub max_page: u32,
    /// Stop once this many matching records have been accumulated.
    pub target_count: usize,
    /// Checkpoint every this many pages.
    pub batch_size: u32,
    /// Retry budget for transient HTTP failures, per request.
    pub retry_times: u32,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub page_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// Inclusive date range selected by the upstream query.
    pub date_begin: String,
    pub date_end: String,
    pub query_host: String,
    pub asset_host: String,
    pub referer: String,
    /// 1101 - 发行公告 bulletin category.
    pub bulletin_type: String,
    pub bond_type: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("harvest"),
            pdf_subdir: "pdf".to_owned(),
            max_page: 311,
            target_count: 7762,
            batch_size: 20,
            retry_times: 3,
            min_delay_secs: 1.5,
            max_delay_secs: 3.0,
            page_timeout_secs: 15,
            download_timeout_secs: 20,
            date_begin: "2020-01-01 00:00:00".to_owned(),
            date_end: "2024-12-31 23:59:59".to_owned(),
            query_host: "https://query.sse.com.cn".to_owned(),
            asset_host: "https://static.sse.com.cn".to_owned(),
            referer: "https://www.sse.com.cn/".to_owned(),
            bulletin_type: "1101".to_owned(),
            bond_type: "COMPANY_BOND_BULLETIN".to_owned(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let cfg = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.max_page >= 1, "max_page must be at least 1");
        ensure!(self.target_count >= 1, "target_count must be at least 1");
        ensure!(self.batch_size >= 1, "batch_size must be at least 1");
        ensure!(
            self.max_delay_secs >= self.min_delay_secs,
            "max_delay_secs must not be below min_delay_secs"
        );
        ensure!(self.min_delay_secs >= 0.0, "delays must be non-negative");
        Ok(())
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.save_dir.join("bond_issuance_announcements.csv")
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.save_dir.join("resume.txt")
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.save_dir.join(&self.pdf_subdir)
    }
}
