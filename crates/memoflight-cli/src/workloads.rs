use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use memoflight::{CacheKey, Producer};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::fetch::{FetchError, HttpProducer};

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The number of distinct keys requested. Ignored for HTTP workloads.
    #[serde(default = "default_keys")]
    pub keys: usize,
    #[serde(flatten)]
    pub payload: Payload,
}

fn default_keys() -> usize {
    100
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// Sleeps for `latency`, then returns the key.
    Sleep {
        #[serde(with = "humantime_serde")]
        latency: Duration,
    },
    /// Sleeps for `latency`, then fails.
    Failing {
        #[serde(with = "humantime_serde")]
        latency: Duration,
    },
    /// Downloads one of `urls`.
    Http { urls: Vec<Url> },
}

pub fn read_workloads(path: &Path) -> Result<WorkloadsConfig> {
    let file = fs::File::open(path).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(file).context("failed to parse workloads YAML")?;

    for (i, workload) in workloads.workloads.iter().enumerate() {
        if workload.concurrency == 0 {
            anyhow::bail!("workload {i} has a concurrency of 0");
        }
        let keys = match &workload.payload {
            Payload::Http { urls } => urls.len(),
            _ => workload.keys,
        };
        if keys == 0 {
            anyhow::bail!("workload {i} has no keys");
        }
    }

    Ok(workloads)
}

#[derive(Debug, Clone, Error)]
pub enum WorkloadError {
    #[error("computation for {0} failed as requested")]
    Failing(CacheKey),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// The computation behind the memo cache of a single workload.
#[derive(Debug)]
pub enum WorkloadProducer {
    Sleep(Duration),
    Failing(Duration),
    Http(HttpProducer),
}

impl Producer for WorkloadProducer {
    type Value = Bytes;
    type Error = WorkloadError;

    fn produce(&self, key: CacheKey) -> BoxFuture<'static, Result<Bytes, WorkloadError>> {
        match self {
            Self::Sleep(latency) => {
                let latency = *latency;
                Box::pin(async move {
                    tokio::time::sleep(latency).await;
                    Ok(Bytes::copy_from_slice(key.as_str().as_bytes()))
                })
            }
            Self::Failing(latency) => {
                let latency = *latency;
                Box::pin(async move {
                    tokio::time::sleep(latency).await;
                    Err(WorkloadError::Failing(key))
                })
            }
            Self::Http(http) => {
                let download = http.produce(key);
                Box::pin(async move { Ok(download.await?) })
            }
        }
    }
}

/// Wraps a producer and counts how often it was invoked.
#[derive(Debug)]
pub struct Counting<P> {
    inner: P,
    calls: Arc<AtomicUsize>,
}

impl<P> Counting<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: Default::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl<P: Producer> Producer for Counting<P> {
    type Value = P::Value;
    type Error = P::Error;

    fn produce(&self, key: CacheKey) -> BoxFuture<'static, Result<P::Value, P::Error>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.produce(key)
    }
}

/// A workload ready to be run: its producer and its key space.
#[derive(Debug)]
pub struct PreparedWorkload {
    pub concurrency: usize,
    pub keys: Vec<CacheKey>,
    pub producer: WorkloadProducer,
}

impl PreparedWorkload {
    pub fn prepare(workload: Workload) -> Result<Self, reqwest::Error> {
        let (producer, keys) = match workload.payload {
            Payload::Sleep { latency } => (WorkloadProducer::Sleep(latency), numbered(workload.keys)),
            Payload::Failing { latency } => {
                (WorkloadProducer::Failing(latency), numbered(workload.keys))
            }
            Payload::Http { urls } => {
                let keys = urls.iter().map(|url| CacheKey::from(url.as_str())).collect();
                (WorkloadProducer::Http(HttpProducer::new()?), keys)
            }
        };

        Ok(Self {
            concurrency: workload.concurrency,
            keys,
            producer,
        })
    }
}

fn numbered(keys: usize) -> Vec<CacheKey> {
    (0..keys).map(|i| CacheKey::from(format!("key-{i}"))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workloads() {
        let yaml = r#"
            workloads:
              - concurrency: 16
                keys: 10
                type: sleep
                latency: 200ms
              - concurrency: 4
                type: failing
                latency: 1s 500ms
              - concurrency: 8
                type: http
                urls: ["http://localhost:8000/a", "http://localhost:8000/b"]
        "#;
        let config: WorkloadsConfig = serde_yaml::from_str(yaml).unwrap();
        let [sleep, failing, http] = &config.workloads[..] else {
            panic!("expected three workloads");
        };

        assert_eq!(sleep.concurrency, 16);
        assert_eq!(sleep.keys, 10);
        assert!(matches!(
            sleep.payload,
            Payload::Sleep { latency } if latency == Duration::from_millis(200)
        ));

        assert_eq!(failing.keys, 100);
        assert!(matches!(
            failing.payload,
            Payload::Failing { latency } if latency == Duration::from_millis(1500)
        ));

        match &http.payload {
            Payload::Http { urls } => assert_eq!(urls[1].path(), "/b"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_workload_type() {
        let yaml = r#"
            workloads:
              - concurrency: 1
                type: minidump
        "#;
        assert!(serde_yaml::from_str::<WorkloadsConfig>(yaml).is_err());
    }

    #[test]
    fn test_read_workloads_validates() {
        let dir = memoflight_test::tempdir();

        let path = dir.path().join("valid.yml");
        fs::write(
            &path,
            "workloads:\n  - concurrency: 2\n    keys: 3\n    type: sleep\n    latency: 1ms\n",
        )
        .unwrap();
        let workloads = read_workloads(&path).unwrap();
        assert_eq!(workloads.workloads.len(), 1);

        let path = dir.path().join("empty_urls.yml");
        fs::write(
            &path,
            "workloads:\n  - concurrency: 2\n    type: http\n    urls: []\n",
        )
        .unwrap();
        let err = read_workloads(&path).unwrap_err();
        assert_eq!(err.to_string(), "workload 0 has no keys");

        assert!(read_workloads(&dir.path().join("missing.yml")).is_err());
    }

    #[tokio::test]
    async fn test_counting_producer() {
        let producer = Counting::new(WorkloadProducer::Failing(Duration::ZERO));
        let calls = producer.calls();

        let result = producer.produce(CacheKey::from("key-1")).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "computation for key-1 failed as requested"
        );
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prepare_sleep_workload() {
        let workload = Workload {
            concurrency: 2,
            keys: 3,
            payload: Payload::Sleep {
                latency: Duration::ZERO,
            },
        };
        let prepared = PreparedWorkload::prepare(workload).unwrap();
        assert_eq!(prepared.keys.len(), 3);
        assert_eq!(prepared.keys[2].as_str(), "key-2");
    }
}
