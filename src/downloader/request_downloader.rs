use crate::common::model::Request;
use crate::downloader::{Downloader, Response};
use crate::errors::{DownloadError, Error, RequestError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method, Proxy};
use std::str::FromStr;
use std::time::Duration;

/// Plain HTTP downloader on top of `reqwest`, one pooled client per proxy.
#[derive(Clone)]
pub struct RequestDownloader {
    default_client: Client,
    proxy_clients: std::sync::Arc<DashMap<String, Client>>,
}

impl RequestDownloader {
    pub fn new() -> Result<Self> {
        let default_client = Client::builder()
            .gzip(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DownloadError::ClientError(e.into()))?;
        Ok(Self {
            default_client,
            proxy_clients: std::sync::Arc::new(DashMap::new()),
        })
    }

    fn get_client(&self, proxy: Option<&str>, connect_timeout: Duration) -> Result<Client> {
        let Some(proxy_url) = proxy else {
            return Ok(self.default_client.clone());
        };
        if let Some(client) = self.proxy_clients.get(proxy_url) {
            return Ok(client.clone());
        }
        let reqwest_proxy =
            Proxy::all(proxy_url).map_err(|e| DownloadError::InvalidProxy(e.into()))?;
        let client = Client::builder()
            .proxy(reqwest_proxy)
            .gzip(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DownloadError::ClientError(e.into()))?;
        // bounded so rotating proxies cannot grow the cache forever
        if self.proxy_clients.len() < 1000 {
            self.proxy_clients.insert(proxy_url.to_string(), client.clone());
        }
        Ok(client)
    }
}

#[async_trait]
impl Downloader for RequestDownloader {
    fn name(&self) -> String {
        "request_downloader".to_string()
    }

    async fn download(&self, request: &Request) -> Result<Response> {
        let client = self.get_client(request.proxy.as_deref(), request.dial_timeout.max(Duration::from_secs(1)))?;
        let method = Method::from_str(&request.method)
            .map_err(|_| RequestError::InvalidMethod(request.method.clone()))?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.conn_timeout.is_zero() {
            builder = builder.timeout(request.conn_timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::TimeoutError(e.into())
            } else {
                DownloadError::NetworkError(e.into())
            }
        })?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(Error::download_failed)?
            .to_vec();
        Ok(Response { status, url, body })
    }
}
