use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::app::ports::HttpFetch;
use crate::error::{MarketError, Result};

const PROGRESS_STEP_BYTES: u64 = 1024 * 1024;

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rent_market/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MarketError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl HttpFetch for ReqwestHttp {
    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.send(url).await?;
        Ok(resp.text().await?)
    }

    async fn download(&self, url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
        let mut resp = self.send(url).await?;
        let total: u64 = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let mut downloaded = 0u64;
        let mut next_report = PROGRESS_STEP_BYTES;
        while let Some(chunk) = resp.chunk().await? {
            sink.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if total > 1_000_000 && downloaded >= next_report {
                debug!(
                    "Downloaded {} / {} bytes ({:.1}%)",
                    downloaded,
                    total,
                    downloaded as f64 / total as f64 * 100.0
                );
                next_report += PROGRESS_STEP_BYTES;
            }
        }
        sink.flush().await?;
        Ok(downloaded)
    }
}
