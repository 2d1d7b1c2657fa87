use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proxy_pool_prober::{ParamMap, ProbeError, ProbeHandle, ProxyAdapter, ProxyType};

/// Adapter whose behaviour is driven by a `behavior` param on each proxy:
/// `ok`, `fail`, `hang` or `panic`.
#[derive(Default)]
pub struct MockAdapter {
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub heads: Arc<AtomicUsize>,
}

impl ProxyAdapter for MockAdapter {
    fn supports(&self, proxy_type: &ProxyType) -> bool {
        matches!(proxy_type, ProxyType::Ss | ProxyType::Socks5)
    }

    fn parse(&self, params: &ParamMap) -> Result<Box<dyn ProbeHandle>, ProbeError> {
        let behavior = params
            .get("behavior")
            .and_then(|v| v.as_str())
            .unwrap_or("ok")
            .to_string();
        if behavior == "panic" {
            panic!("adapter blew up parsing {:?}", params.get("name"));
        }
        if behavior == "reject" {
            return Err(ProbeError::AdapterParse("unknown cipher".into()));
        }
        Ok(Box::new(MockHandle {
            behavior,
            in_flight: Arc::clone(&self.in_flight),
            peak: Arc::clone(&self.peak),
            heads: Arc::clone(&self.heads),
        }))
    }
}

struct MockHandle {
    behavior: String,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    heads: Arc<AtomicUsize>,
}

#[async_trait]
impl ProbeHandle for MockHandle {
    async fn http_head(&self, _url: &str) -> Result<(), ProbeError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match self.behavior.as_str() {
            "fail" => Err(ProbeError::Network("connection refused".into())),
            "hang" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            _ => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
