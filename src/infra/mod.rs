pub mod downloader;
pub mod http_client;
