use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tracing::{error, info, instrument, warn};

use crate::app::ports::HttpFetch;
use crate::config::ApiConfig;
use crate::error::{MarketError, Result};
use crate::metrics::DownloadMetrics;

/// Where the export landed and what it contained
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub href: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Writer that hashes every byte accepted by the wrapped writer.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn hex_digest(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll {
            this.hasher.update(&buf[..*written]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Fetches the listing page, finds the export link and downloads it.
pub struct RentContractsDownloader<H: HttpFetch> {
    http: H,
    api: ApiConfig,
    backoff_unit: Duration,
}

impl<H: HttpFetch> RentContractsDownloader<H> {
    pub fn new(http: H, api: ApiConfig) -> Self {
        Self {
            http,
            api,
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Scale of the backoff: attempt `n` (0-based) waits `factor^n` units.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.api.retry_backoff_factor.max(1);
        let units = factor.saturating_pow(attempt).min(u32::MAX as u64) as u32;
        self.backoff_unit.saturating_mul(units)
    }

    /// Run `op` up to `max_retries` times, sleeping between retryable failures.
    async fn with_retry<T, F, Fut>(&self, what: &str, url: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.api.max_retries.max(1);
        let mut last_error = String::new();
        for attempt in 0..attempts {
            info!("{} {} (attempt {}/{})", what, url, attempt + 1, attempts);
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("{} failed on attempt {}: {}", what, attempt + 1, e);
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        let wait = self.backoff(attempt);
                        info!("Retrying in {:?}", wait);
                        DownloadMetrics::record_retry();
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(e) => {
                    error!("{} failed: {}", what, e);
                    return Err(e);
                }
            }
        }
        error!("Max retries reached for {}", url);
        Err(MarketError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    pub async fn fetch_listing(&self, url: &str) -> Result<String> {
        let html = self
            .with_retry("Fetching rent contracts page", url, || self.http.get_text(url))
            .await?;
        info!("Successfully fetched HTML content ({} bytes)", html.len());
        Ok(html)
    }

    /// First matching link's `href`, resolved against `page_url`.
    pub fn find_download_link(&self, html: &str, page_url: &str) -> Result<String> {
        let selector = Selector::parse(&self.api.download_link_selector).map_err(|e| {
            MarketError::Config(format!(
                "Invalid download link selector '{}': {}",
                self.api.download_link_selector, e
            ))
        })?;
        let document = Html::parse_document(html);
        let href = document
            .select(&selector)
            .find_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MarketError::DownloadLinkNotFound(page_url.to_string()))?;

        let resolved = match reqwest::Url::parse(page_url).and_then(|base| base.join(href)) {
            Ok(url) => url.to_string(),
            Err(_) => href.to_string(),
        };
        info!("Found download link: {}", resolved);
        Ok(resolved)
    }

    /// Download `href` to `dest` through a sibling temp file, hashing while streaming.
    pub async fn download_file(&self, href: &str, dest: &Path) -> Result<DownloadReport> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging_buf = crate::pipeline::parquet_out::staging_path(dest);
        let staging = staging_buf.as_path();

        let result = self
            .with_retry("Downloading file", href, || async move {
                let file = tokio::fs::File::create(staging).await?;
                let mut sink = HashingWriter::new(file);
                let bytes = self.http.download(href, &mut sink).await?;
                sink.inner.sync_all().await?;
                Ok((bytes, sink.hex_digest()))
            })
            .await;

        let (bytes, sha256) = match result {
            Ok(done) => done,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&staging, dest).await?;

        info!(
            "Successfully downloaded {} bytes to {} (sha256 {})",
            bytes,
            dest.display(),
            sha256
        );
        Ok(DownloadReport {
            href: href.to_string(),
            bytes,
            sha256,
        })
    }

    /// Listing page, then link, then file.
    #[instrument(skip(self))]
    pub async fn run(&self, url: &str, dest: &Path) -> Result<DownloadReport> {
        let started = Instant::now();
        let result = async {
            let html = self.fetch_listing(url).await?;
            let href = self.find_download_link(&html, url)?;
            self.download_file(&href, dest).await
        }
        .await;

        match &result {
            Ok(report) => {
                DownloadMetrics::record_success(report.bytes, started.elapsed().as_secs_f64());
                info!("Rent contracts successfully downloaded to {}", dest.display());
            }
            Err(e) => {
                DownloadMetrics::record_failure();
                error!("Failed to download rent contracts: {}", e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpFetch;
    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;

    struct StaticPage;

    #[async_trait]
    impl HttpFetch for StaticPage {
        async fn get_text(&self, _url: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn download(&self, _url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
            sink.write_all(b"x").await?;
            Ok(1)
        }
    }

    fn downloader() -> RentContractsDownloader<StaticPage> {
        RentContractsDownloader::new(StaticPage, ApiConfig::default())
    }

    #[test]
    fn relative_links_resolve_against_page() {
        let html = r#"<html><body>
            <a class="other" href="/nope.csv">x</a>
            <a class="action-icon-anchor" href="/open-data/rents.csv">Download</a>
        </body></html>"#;
        let href = downloader()
            .find_download_link(html, "https://example.org/en/open-data/")
            .unwrap();
        assert_eq!(href, "https://example.org/open-data/rents.csv");
    }

    #[test]
    fn missing_link_is_reported() {
        let err = downloader()
            .find_download_link("<a class=\"action-icon-anchor\">no href</a>", "https://example.org/")
            .unwrap_err();
        assert!(matches!(err, MarketError::DownloadLinkNotFound(_)));
    }

    #[tokio::test]
    async fn hashing_writer_digests_chunked_writes() {
        let mut sink = HashingWriter::new(Vec::new());
        let chunks: [&[u8]; 3] = [b"contract_id,", b"annual_amount\n", b"C1,120000\n"];
        for chunk in chunks {
            sink.write_all(chunk).await.unwrap();
        }
        sink.flush().await.unwrap();

        let expected = hex::encode(Sha256::digest(b"contract_id,annual_amount\nC1,120000\n"));
        assert_eq!(sink.inner, b"contract_id,annual_amount\nC1,120000\n".to_vec());
        assert_eq!(sink.hex_digest(), expected);
    }

    #[test]
    fn backoff_grows_geometrically() {
        let d = downloader().with_backoff_unit(Duration::from_millis(10));
        assert_eq!(d.backoff(0), Duration::from_millis(10));
        assert_eq!(d.backoff(1), Duration::from_millis(20));
        assert_eq!(d.backoff(2), Duration::from_millis(40));
    }
}
