pub mod request_downloader;

pub use request_downloader::RequestDownloader;

use crate::common::model::Request;
use crate::errors::Result;
use async_trait::async_trait;

/// What the scheduling core needs back from a download.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Final URL after redirects
    pub url: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> String;

    async fn download(&self, request: &Request) -> Result<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        let mut resp = Response {
            status: 200,
            url: "https://example.com/".into(),
            body: Vec::new(),
        };
        assert!(resp.is_success());
        resp.status = 204;
        assert!(resp.is_success());
        resp.status = 301;
        assert!(!resp.is_success());
        resp.status = 503;
        assert!(!resp.is_success());
    }
}
