//! Downloads URLs through a memo cache.
use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::BoxFuture;
use memoflight::config::Config;
use memoflight::{CacheKey, Memo, MemoError, Producer};
use thiserror::Error;
use tokio::runtime::Handle;
use url::Url;

/// An error downloading a URL.
///
/// This only holds strings, since every caller of a cached download receives its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The cache key is not a valid URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// The server responded with a non-success status code.
    #[error("server responded with {0}")]
    Status(u16),
    /// The request could not be sent or the response body could not be read.
    #[error("failed to download: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status(status.as_u16()),
            None => Self::Transport(err.to_string()),
        }
    }
}

/// A [`Producer`] that downloads the URL given as key and yields the response body.
#[derive(Clone, Debug)]
pub struct HttpProducer {
    client: reqwest::Client,
}

impl HttpProducer {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("memoflight/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn download(client: reqwest::Client, key: CacheKey) -> Result<Bytes, FetchError> {
        let url = Url::parse(key.as_str()).map_err(|err| FetchError::InvalidUrl(err.to_string()))?;

        tracing::debug!(%url, "Downloading");
        let response = client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}

impl Producer for HttpProducer {
    type Value = Bytes;
    type Error = FetchError;

    fn produce(&self, key: CacheKey) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        Box::pin(Self::download(self.client.clone(), key))
    }
}

/// Creates a memo cache for downloads, configured by the `memo` section of `config`.
pub fn create_memo(config: &Config, runtime: Handle) -> Result<Memo<HttpProducer>, reqwest::Error> {
    let producer = HttpProducer::new()?;
    Ok(Memo::with_config(
        producer,
        &config.memo.named("fetch"),
        runtime,
    ))
}

/// The outcome of requesting a single URL.
#[derive(Debug)]
pub struct FetchResult {
    pub url: Url,
    pub elapsed: Duration,
    pub result: Result<Bytes, MemoError<FetchError>>,
}

impl fmt::Display for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(body) => write!(f, "{}, {:.2?}, {} bytes", self.url, self.elapsed, body.len()),
            Err(err) => write!(f, "{}, {:.2?}, error: {}", self.url, self.elapsed, err),
        }
    }
}

async fn fetch_one<P>(memo: &Memo<P>, url: &Url) -> FetchResult
where
    P: Producer<Value = Bytes, Error = FetchError>,
{
    let start = Instant::now();
    let result = memo.get(url.as_str()).await;
    FetchResult {
        url: url.clone(),
        elapsed: start.elapsed(),
        result,
    }
}

/// Requests all `urls` through `memo`, in order of the input.
///
/// Unless `sequential` is set, all requests are issued concurrently.
pub async fn fetch_all<P>(memo: &Memo<P>, urls: &[Url], sequential: bool) -> Vec<FetchResult>
where
    P: Producer<Value = Bytes, Error = FetchError>,
{
    if sequential {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            results.push(fetch_one(memo, url).await);
        }
        results
    } else {
        futures::future::join_all(urls.iter().map(|url| fetch_one(memo, url))).await
    }
}
