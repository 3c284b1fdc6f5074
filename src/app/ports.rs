use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::Result;

/// Outbound HTTP used by the downloader.
///
/// Implementations map non-success statuses to `MarketError::HttpStatus` so the
/// caller can tell retryable failures from fatal ones.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Body of `url` as text.
    async fn get_text(&self, url: &str) -> Result<String>;

    /// Stream the body of `url` into `sink`, returning the number of bytes written.
    async fn download(&self, url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64>;
}
