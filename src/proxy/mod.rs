use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, Proxy};

pub const DEFAULT_PROXY: &str = "127.0.0.1:4444";

const PROBE_TARGET: &str = "http://proxy.i2p/";
const PROBE_MARKER: &str = "I2P HTTP proxy OK";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A single readiness check. Probes report failure as `false`; they never
/// abort the caller.
pub trait ProxyProbe {
    fn probe(&self) -> impl Future<Output = bool> + Send;
}

/// Asks the proxy for its well-known status page and looks for the marker.
pub struct HttpProbe {
    proxy_url: String,
    client: Option<Client>,
}

impl HttpProbe {
    pub fn new(proxy: &str) -> Self {
        let proxy_url = format!("http://{proxy}");
        let client = Proxy::http(&proxy_url)
            .and_then(|p| Client::builder().proxy(p).timeout(PROBE_TIMEOUT).build())
            .map_err(|e| warn!("proxy: cannot build probe client for {proxy_url}: {e}"))
            .ok();
        Self { proxy_url, client }
    }
}

impl ProxyProbe for HttpProbe {
    async fn probe(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        let response = match client.get(PROBE_TARGET).send().await {
            Ok(resp) => resp,
            Err(err) => {
                debug!("proxy: {} unreachable: {err}", self.proxy_url);
                return false;
            }
        };
        match response.text().await {
            Ok(body) => body.contains(PROBE_MARKER),
            Err(err) => {
                debug!("proxy: reading probe response failed: {err}");
                false
            }
        }
    }
}

/// Treats an already-bound port as evidence that the proxy is listening.
pub struct ListenerProbe {
    addr: String,
}

impl ListenerProbe {
    pub fn new(proxy: &str) -> Self {
        Self {
            addr: proxy.to_owned(),
        }
    }
}

impl ProxyProbe for ListenerProbe {
    async fn probe(&self) -> bool {
        match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(_listener) => false,
            Err(err) => {
                debug!("proxy: {} is taken ({err})", self.addr);
                true
            }
        }
    }
}

/// Bounded, fixed-cadence polling of a [`ProxyProbe`].
#[derive(Debug, Clone, Copy)]
pub struct ProxyGate {
    attempts: u32,
    interval: Duration,
}

impl Default for ProxyGate {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

impl ProxyGate {
    /// Returns true as soon as `probe` succeeds, false after `attempts`
    /// failures.
    pub async fn await_proxy<P: ProxyProbe>(&self, probe: &P) -> bool {
        for attempt in 1..=self.attempts {
            if probe.probe().await {
                info!("proxy: ready after {attempt} attempt(s)");
                return true;
            }
            let remaining = self.attempts - attempt;
            if attempt == 1 {
                warn!("proxy: not ready, will retry {remaining} more time(s)");
            } else {
                debug!("proxy: {remaining} attempt(s) left");
            }
            if remaining > 0 {
                tokio::time::sleep(self.interval).await;
            }
        }
        warn!("proxy: gave up after {} attempts", self.attempts);
        false
    }
}
