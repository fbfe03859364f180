use anyhow::{anyhow, Context};
use rand::Rng;
use reqwest::{header, Client, Response, StatusCode};
use tokio::time::{sleep, Duration};

static USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/142.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Firefox/139.0",
];

static TRANSIENT_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

const BACKOFF_FACTOR: f64 = 0.8;

/// GET-only client with a bounded retry budget for transient upstream
/// failures. Every attempt draws a fresh User-Agent from the pool; the
/// Referer is fixed at build time. Connection pooling lives in the wrapped
/// `reqwest::Client`, so clones share one pool.
#[derive(Debug, Clone)]
pub struct ReqClient {
    inner: Client,
    retries: u32,
}

impl ReqClient {
    pub fn new(retries: u32, referer: &str) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::REFERER,
            header::HeaderValue::from_str(referer).context("invalid referer header")?,
        );
        let inner = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .build()
            .context("build http client")?;
        Ok(ReqClient { inner, retries })
    }

    fn pick_user_agent() -> &'static str {
        USER_AGENTS[rand::thread_rng().gen_range(0..USER_AGENTS.len())]
    }

    // 0.8s, 1.6s, 3.2s, ...
    fn backoff(attempt: u32) -> Duration {
        Duration::from_secs_f64(BACKOFF_FACTOR * f64::powi(2.0, attempt as i32))
    }

    fn is_transient(status: StatusCode) -> bool {
        TRANSIENT_STATUS.contains(&status.as_u16())
    }

    /// One logical GET. Retries up to the budget on transient status codes
    /// and on connection-level failures, with exponential backoff between
    /// attempts; any other failure surfaces immediately.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Response> {
        let mut attempt: u32 = 0;
        loop {
            let mut req = self
                .inner
                .get(url)
                .header(header::USER_AGENT, Self::pick_user_agent())
                .timeout(timeout);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(accept) = accept {
                req = req.header(header::ACCEPT, accept);
            }
            match req.send().await {
                Ok(resp) if Self::is_transient(resp.status()) => {
                    if attempt >= self.retries {
                        return Err(anyhow!(
                            "GET {} still {} after {} retries",
                            url,
                            resp.status(),
                            self.retries
                        ));
                    }
                    sleep(Self::backoff(attempt)).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    return resp
                        .error_for_status()
                        .with_context(|| format!("GET {} failed", url))
                }
                Err(err) if err.is_connect() || err.is_timeout() => {
                    if attempt >= self.retries {
                        return Err(err).with_context(|| {
                            format!("GET {} failed after {} retries", url, self.retries)
                        });
                    }
                    sleep(Self::backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err).with_context(|| format!("GET {} failed", url)),
            }
        }
    }
}
