use std::path::Path;
use std::time::Instant;

use futures_util::StreamExt;
use log::debug;
use reqwest::{Client, Proxy};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::util::{format_speed, progress_percent};

const USER_AGENT: &str = concat!("tbfetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by the manifest resolver and the artifact fetcher.
///
/// No overall request timeout is set: bundles are large and the caller
/// observes transfer errors directly.
#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    pub fn new(http_proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(proxy) = http_proxy {
            let proxy_url = format!("http://{proxy}");
            debug!("network client: routing requests through {proxy_url}");
            builder = builder.proxy(Proxy::all(&proxy_url).map_err(Error::HttpClient)?);
        }
        let client = builder.build().map_err(Error::HttpClient)?;
        Ok(Self { client })
    }

    /// GET `url` and return the whole body.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::network(url, e))?;
        let body = response.bytes().await.map_err(|e| Error::network(url, e))?;
        Ok(body.to_vec())
    }

    /// Stream `url` into `dest`, creating or truncating it.
    pub async fn download_to_path(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::network(url, e))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        let mut file = File::create(dest).await.map_err(|e| Error::io(dest, e))?;

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::network(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(dest, e))?;
            downloaded += chunk.len() as u64;

            let since = last_tick.elapsed().as_secs_f32();
            if since > 1.0 {
                let speed = (downloaded - last_bytes) as f32 / since;
                debug!(
                    "download: {} {:.1}% ({})",
                    dest.display(),
                    progress_percent(downloaded, total),
                    format_speed(speed)
                );
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }

        file.flush().await.map_err(|e| Error::io(dest, e))?;

        if let Some(total) = total
            && downloaded < total
        {
            return Err(Error::Truncated {
                url: url.to_owned(),
                received: downloaded,
                expected: total,
            });
        }

        Ok(downloaded)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Tiny in-process HTTP origin for exercising the client.

    use std::collections::HashMap;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Body;
    use axum::extract::{Request, State};
    use axum::http::{StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use futures_util::{StreamExt, stream};

    #[derive(Default)]
    pub struct Origin {
        routes: HashMap<String, Vec<u8>>,
        stalls: Mutex<HashMap<String, (Vec<u8>, u64)>>,
        hits: AtomicUsize,
    }

    impl Origin {
        pub fn with(mut self, path: &str, body: impl Into<Vec<u8>>) -> Self {
            self.routes.insert(path.to_owned(), body.into());
            self
        }

        /// The first request for `path` announces `len` bytes, sends `prefix`
        /// and then hangs. Later requests get the regular route.
        pub fn stalling_once(self, path: &str, prefix: impl Into<Vec<u8>>, len: u64) -> Self {
            self.stalls
                .lock()
                .unwrap()
                .insert(path.to_owned(), (prefix.into(), len));
            self
        }
    }

    pub struct RunningOrigin {
        pub addr: SocketAddr,
        origin: Arc<Origin>,
    }

    impl RunningOrigin {
        pub fn url(&self, path: &str) -> String {
            format!("http://{}{path}", self.addr)
        }

        pub fn hits(&self) -> usize {
            self.origin.hits.load(Ordering::SeqCst)
        }
    }

    async fn respond(State(origin): State<Arc<Origin>>, req: Request) -> Response {
        origin.hits.fetch_add(1, Ordering::SeqCst);
        let stall = origin.stalls.lock().unwrap().remove(req.uri().path());
        if let Some((prefix, len)) = stall {
            let body = stream::once(async move { Ok::<_, io::Error>(prefix) })
                .chain(stream::pending());
            return (
                [(header::CONTENT_LENGTH, len.to_string())],
                Body::from_stream(body),
            )
                .into_response();
        }
        match origin.routes.get(req.uri().path()) {
            Some(body) => body.clone().into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    pub async fn serve(origin: Origin) -> RunningOrigin {
        let origin = Arc::new(origin);
        let app = Router::new()
            .fallback(respond)
            .with_state(origin.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        RunningOrigin { addr, origin }
    }
}
