use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Duration;

use crate::client::ReqClient;

/// Outcome of one attachment attempt. Nothing here is an error for the
/// run: a failed download is recorded and retried implicitly on the next
/// run via the path-exists check.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    /// Target file already on disk; no network call performed.
    AlreadyExists,
    /// The record carries no attachment URL; no network call performed.
    NoUrl,
    Success,
    /// Truncated human-readable reason.
    Failed(String),
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadStatus::AlreadyExists => write!(f, "已存在"),
            DownloadStatus::NoUrl => write!(f, "无链接"),
            DownloadStatus::Success => write!(f, "成功"),
            DownloadStatus::Failed(reason) => write!(f, "失败：{}", reason),
        }
    }
}

/// Idempotent PDF fetcher. The existence of the sanitized target file is
/// the only durable marker of completed work.
pub struct Downloader {
    client: ReqClient,
    dir: PathBuf,
    timeout: Duration,
    illegal: Regex,
}

impl Downloader {
    pub fn new(client: ReqClient, dir: PathBuf, timeout: Duration) -> Self {
        Downloader {
            client,
            dir,
            timeout,
            illegal: Regex::new(r#"[\\/:*?"<>|]"#).unwrap(),
        }
    }

    /// Characters illegal in file names become `_`. The dataset keeps the
    /// unsanitized `pdf_name`; only the on-disk name is rewritten.
    fn sanitize(&self, name: &str) -> String {
        self.illegal.replace_all(name, "_").into_owned()
    }

    pub fn target_path(&self, pdf_name: &str) -> PathBuf {
        self.dir.join(format!("{}.pdf", self.sanitize(pdf_name)))
    }

    pub async fn download(&self, pdf_url: Option<&str>, pdf_name: &str) -> DownloadStatus {
        let path = self.target_path(pdf_name);
        if path.exists() {
            return DownloadStatus::AlreadyExists;
        }
        let url = match pdf_url {
            Some(url) if !url.is_empty() => url,
            _ => return DownloadStatus::NoUrl,
        };
        match self.fetch_to(url, &path).await {
            Ok(()) => DownloadStatus::Success,
            Err(err) => DownloadStatus::Failed(truncate_reason(&err)),
        }
    }

    async fn fetch_to(&self, url: &str, path: &Path) -> anyhow::Result<()> {
        let resp = self
            .client
            .get(url, &[], Some("application/pdf, */*"), self.timeout)
            .await?;
        let content = resp.bytes().await?;
        let mut file = File::create(path).await?;
        file.write_all(&content).await?;
        Ok(())
    }
}

fn truncate_reason(err: &anyhow::Error) -> String {
    err.to_string().chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Record;
    use tempfile::TempDir;

    fn downloader(dir: &TempDir) -> Downloader {
        let client = ReqClient::new(0, "https://www.sse.com.cn/").unwrap();
        Downloader::new(client, dir.path().to_path_buf(), Duration::from_secs(20))
    }

    #[test]
    fn sanitizes_every_illegal_character() {
        let dir = TempDir::new().unwrap();
        let d = downloader(&dir);
        assert_eq!(d.sanitize(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(d.sanitize("25国贸01_发行公告"), "25国贸01_发行公告");
    }

    #[test]
    fn target_path_is_sanitized_name_plus_pdf() {
        let dir = TempDir::new().unwrap();
        let d = downloader(&dir);
        let path = d.target_path("甲/乙?发行公告");
        assert_eq!(path, dir.path().join("甲_乙_发行公告.pdf"));
    }

    #[test]
    fn derived_name_stays_unsanitized_while_file_name_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let d = downloader(&dir);
        let pdf_name = Record::derive_pdf_name("25国贸", "发行公告（第一期/回售?）");
        // The dataset column carries this value verbatim.
        assert_eq!(pdf_name, "25国贸_发行公告（第一期/回售?）");
        let path = d.target_path(&pdf_name);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "25国贸_发行公告（第一期_回售_）.pdf"
        );
    }

    #[tokio::test]
    async fn existing_file_short_circuits_without_network() {
        let dir = TempDir::new().unwrap();
        let d = downloader(&dir);
        std::fs::write(d.target_path("乙_发行公告"), b"%PDF-1.4").unwrap();
        // A URL that would fail if it were ever contacted.
        let status = d
            .download(Some("http://127.0.0.1:1/never.pdf"), "乙_发行公告")
            .await;
        assert_eq!(status, DownloadStatus::AlreadyExists);
    }

    #[tokio::test]
    async fn missing_url_short_circuits_without_network() {
        let dir = TempDir::new().unwrap();
        let d = downloader(&dir);
        assert_eq!(d.download(None, "乙_发行公告").await, DownloadStatus::NoUrl);
        assert_eq!(d.download(Some(""), "乙_发行公告").await, DownloadStatus::NoUrl);
        assert!(!d.target_path("乙_发行公告").exists());
    }

    #[tokio::test]
    async fn unreachable_host_reports_failure_without_creating_a_file() {
        let dir = TempDir::new().unwrap();
        let d = downloader(&dir);
        let status = d
            .download(Some("http://127.0.0.1:1/x.pdf"), "丙_发行公告")
            .await;
        assert!(matches!(status, DownloadStatus::Failed(_)));
        assert!(!d.target_path("丙_发行公告").exists());
    }

    #[test]
    fn failure_reason_is_truncated() {
        let err = anyhow::anyhow!("x".repeat(200));
        assert_eq!(truncate_reason(&err).chars().count(), 60);
    }
}
