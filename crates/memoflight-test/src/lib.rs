//! Shared fixtures for the memoflight test suites.
//!
//! Call [`setup`] at the start of every test so that log output ends up in the
//! captured test output. A [`HitCounter`] stops serving once dropped, so keep it
//! in a binding until the last request was made.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{self, Request};
use axum::middleware::{self, Next};
use axum::routing::get;
use axum::Router;
use reqwest::{StatusCode, Url};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Routes test logs of the memoflight crates into the test writer.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoflight=trace,memoflight_cli=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A scratch directory, removed again when the returned guard is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// A local HTTP server that counts the requests it receives per path.
///
/// Routes:
///
///  - `/delay/<duration>/<path>`: redirects to `/<path>` after the given duration.
///  - `/respond_statuscode/<code>/<tail>`: an empty response with that status code.
///  - `/garbage_data/<tail>`: responds with `<tail>` as body.
///
/// Must be created within a tokio runtime. The server task is aborted on drop.
pub struct HitCounter {
    task: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    hits: Hits,
}

impl HitCounter {
    pub fn new() -> Self {
        let hits = Hits::default();

        let count_hits = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri), req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    *hits.lock().unwrap().entry(uri.to_string()).or_default() += 1;
                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;
                        (StatusCode::FOUND, [("Location", format!("/{path}"))])
                    },
                ),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/garbage_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .layer(middleware::from_fn(count_hits));

        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let task = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { task, socket, hits }
    }

    /// The total number of requests since the last call. Resets the counts.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// The requests per path since the last call, sorted by path. Resets the counts.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    /// A URL on this server, with `localhost` as host.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{path}", self.socket.port())
            .parse()
            .unwrap()
    }
}

impl Default for HitCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HitCounter {
    fn drop(&mut self) {
        self.task.abort();
    }
}
