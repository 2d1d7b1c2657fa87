//! Simple example of probing a pool and serving a filtered view.

use proxy_pool_prober::{FilterQuery, Proxy, ProberConfig, ProxyPool, ProxyType, RawQuery, ReqwestAdapter};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ProberConfig::builder()
        .test_url("https://www.gstatic.com/generate_204")
        .concurrency(16)
        .timeout(Duration::from_secs(5))
        .build()?;
    let adapter = Arc::new(ReqwestAdapter::from_config(&config));
    let pool = ProxyPool::new(config, adapter);

    pool.replace(vec![
        Proxy::new("🇺🇸 US-Relay-01", ProxyType::Socks5, "127.0.0.1", 1080),
        Proxy::new("🇯🇵 JP-Pool NF", ProxyType::Http, "127.0.0.1", 3128),
        // not understood by the reqwest adapter, probed over raw TCP
        Proxy::new("🇭🇰 HK-02", ProxyType::Trojan, "127.0.0.1", 443).with_param("password", "secret"),
    ]);

    println!("Probing pool...");
    let summary = pool.check_all_proxies().await;
    println!("Probe summary: {:?}", summary);

    let raw = RawQuery {
        country: "US,JP".to_string(),
        filter: "rp".to_string(),
        speed: "0".to_string(),
        ..RawQuery::default()
    };
    for proxy in pool.provide(&FilterQuery::from_raw(&raw)) {
        println!("{}", proxy);
    }

    Ok(())
}
