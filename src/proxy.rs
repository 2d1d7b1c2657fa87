//! Proxy descriptor, protocol tag and identity.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProbeError;

/// Generic parameter map handed to a protocol adapter.
pub type ParamMap = Map<String, Value>;

/// Protocol tag of a proxy. Unknown tags are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
    Ss,
    Ssr,
    Vmess,
    Vless,
    Trojan,
    Hysteria2,
    Other(String),
}

impl ProxyType {
    pub fn as_str(&self) -> &str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5",
            ProxyType::Ss => "ss",
            ProxyType::Ssr => "ssr",
            ProxyType::Vmess => "vmess",
            ProxyType::Vless => "vless",
            ProxyType::Trojan => "trojan",
            ProxyType::Hysteria2 => "hysteria2",
            ProxyType::Other(tag) => tag,
        }
    }
}

impl FromStr for ProxyType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "http" => ProxyType::Http,
            "https" => ProxyType::Https,
            "socks5" => ProxyType::Socks5,
            "ss" => ProxyType::Ss,
            "ssr" => ProxyType::Ssr,
            "vmess" => ProxyType::Vmess,
            "vless" => ProxyType::Vless,
            "trojan" => ProxyType::Trojan,
            "hysteria2" => ProxyType::Hysteria2,
            other => ProxyType::Other(other.to_string()),
        })
    }
}

impl From<String> for ProxyType {
    fn from(tag: String) -> Self {
        match tag.parse() {
            Ok(proxy_type) => proxy_type,
            Err(never) => match never {},
        }
    }
}

impl From<ProxyType> for String {
    fn from(proxy_type: ProxyType) -> Self {
        proxy_type.as_str().to_string()
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a proxy, derived from its connection parameters only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(String);

impl ProxyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Representation of a proxy endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    /// Display name. Rewritten by the filter with a speed annotation.
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub server: String,
    pub port: u16,
    /// Protocol-specific fields (credentials, cipher, uuid, alterId, ...).
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

/// Keys owned by the descriptor itself; they never come from `params`.
const RESERVED_KEYS: [&str; 4] = ["name", "type", "server", "port"];

/// Counters some adapters expect as integers whatever the source wrote.
const INTEGER_PARAMS: [&str; 2] = ["up", "down"];

impl Proxy {
    /// Create a proxy without protocol-specific parameters.
    pub fn new(
        name: impl Into<String>,
        proxy_type: ProxyType,
        server: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            proxy_type,
            server: server.into(),
            port,
            params: BTreeMap::new(),
        }
    }

    /// Attach a protocol-specific parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Identity of this proxy. The display name does not take part.
    pub fn id(&self) -> ProxyId {
        let mut key = format!("{}://{}:{}", self.proxy_type, self.server, self.port);
        for (name, value) in &self.params {
            if RESERVED_KEYS.contains(&name.as_str()) {
                continue;
            }
            key.push('|');
            key.push_str(name);
            key.push('=');
            // 0, 0.0 and "0" from different sources name the same counter value.
            let normalized = if name == "alterId" || INTEGER_PARAMS.contains(&name.as_str()) {
                as_integer(value).map(Value::from)
            } else {
                None
            };
            key.push_str(&normalized.as_ref().unwrap_or(value).to_string());
        }
        ProxyId(key)
    }

    /// Whether the descriptor carries enough to be dialled at all.
    pub fn is_valid(&self) -> bool {
        !self.server.trim().is_empty() && self.port != 0
    }

    /// Whether the server is an IPv6 literal. IPv4-mapped addresses count as IPv4.
    pub fn is_ipv6(&self) -> bool {
        let host = self.server.trim_start_matches('[').trim_end_matches(']');
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(addr)) => addr.to_ipv4_mapped().is_none(),
            _ => false,
        }
    }

    /// Build the generic parameter map handed to a protocol adapter.
    pub fn to_param_map(&self) -> Result<ParamMap, ProbeError> {
        if !self.is_valid() {
            return Err(ProbeError::MalformedDescriptor(format!(
                "{} has no usable server/port",
                self.name
            )));
        }

        let mut map = ParamMap::new();
        for (key, value) in &self.params {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if key == "alterId" && self.proxy_type != ProxyType::Vmess {
                continue;
            }
            map.insert(key.clone(), value.clone());
        }
        map.insert("name".into(), Value::from(self.name.clone()));
        map.insert("type".into(), Value::from(self.proxy_type.as_str()));
        map.insert("server".into(), Value::from(self.server.clone()));
        map.insert("port".into(), Value::from(self.port));

        if self.proxy_type == ProxyType::Vmess {
            let alter_id = map
                .get("alterId")
                .and_then(as_integer)
                .ok_or_else(|| {
                    ProbeError::MalformedDescriptor(format!("{} has no numeric alterId", self.name))
                })?;
            map.insert("alterId".into(), Value::from(alter_id));
        }
        for key in INTEGER_PARAMS {
            if let Some(value) = map.get(key) {
                let number = as_integer(value).ok_or_else(|| {
                    ProbeError::MalformedDescriptor(format!("{}: {} is not numeric", self.name, key))
                })?;
                map.insert(key.into(), Value::from(number));
            }
        }

        Ok(map)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {} {}:{}>", self.proxy_type, self.name, self.server, self.port)
    }
}

/// Read a JSON number or numeric string as an integer, truncating fractions.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmess() -> Proxy {
        Proxy::new("🇺🇸 US-01", ProxyType::Vmess, "1.2.3.4", 443)
            .with_param("uuid", "b831381d-6324-4d53-ad4f-8cda48b30811")
            .with_param("alterId", 0.0)
            .with_param("cipher", "auto")
    }

    #[test]
    fn identity_ignores_display_name() {
        let a = vmess();
        let mut b = vmess();
        b.name = "🇺🇸 US-01 | 12.30Mb".to_string();
        assert_eq!(a.id(), b.id());

        let c = vmess().with_param("cipher", "aes-128-gcm");
        assert_ne!(a.id(), c.id());
        let mut d = vmess();
        d.port = 8443;
        assert_ne!(a.id(), d.id());
    }

    #[test]
    fn identity_normalizes_numeric_counters() {
        let int = vmess().with_param("alterId", 0).id();
        let float = vmess().with_param("alterId", 0.0).id();
        let text = vmess().with_param("alterId", "0").id();
        assert_eq!(int, float);
        assert_eq!(int, text);
        assert_ne!(int, vmess().with_param("alterId", 64).id());

        let hy = |up: Value| Proxy::new("h", ProxyType::Hysteria2, "1.2.3.4", 443).with_param("up", up);
        assert_eq!(hy(Value::from("100")).id(), hy(Value::from(100)).id());
    }

    #[test]
    fn param_map_normalizes_numbers() {
        let map = vmess().to_param_map().unwrap();
        assert_eq!(map["port"], Value::from(443));
        assert_eq!(map["alterId"], Value::from(0));
        assert_eq!(map["type"], Value::from("vmess"));

        let from_string = vmess().with_param("alterId", "64").to_param_map().unwrap();
        assert_eq!(from_string["alterId"], Value::from(64));
    }

    #[test]
    fn alter_id_only_for_vmess() {
        let trojan = Proxy::new("t", ProxyType::Trojan, "example.com", 443)
            .with_param("password", "secret")
            .with_param("alterId", 2);
        let map = trojan.to_param_map().unwrap();
        assert!(!map.contains_key("alterId"));
        assert_eq!(map["password"], Value::from("secret"));
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let missing = Proxy::new("v", ProxyType::Vmess, "1.2.3.4", 443);
        assert!(matches!(
            missing.to_param_map(),
            Err(ProbeError::MalformedDescriptor(_))
        ));

        let no_port = Proxy::new("s", ProxyType::Ss, "1.2.3.4", 0);
        assert!(no_port.to_param_map().is_err());

        let bad_counter = Proxy::new("h", ProxyType::Hysteria2, "1.2.3.4", 443).with_param("up", "fast");
        assert!(bad_counter.to_param_map().is_err());
    }

    #[test]
    fn detects_ipv6_literals() {
        let mut proxy = Proxy::new("p", ProxyType::Ss, "2001:db8::1", 8388);
        assert!(proxy.is_ipv6());
        proxy.server = "[2001:db8::1]".into();
        assert!(proxy.is_ipv6());
        proxy.server = "::ffff:10.0.0.1".into();
        assert!(!proxy.is_ipv6());
        proxy.server = "10.0.0.1".into();
        assert!(!proxy.is_ipv6());
        proxy.server = "node.example.com".into();
        assert!(!proxy.is_ipv6());
    }

    #[test]
    fn deserializes_clash_style_descriptor() {
        let json = r#"{"name":"HK-Relay","type":"ss","server":"5.6.7.8","port":8388,"cipher":"aes-256-gcm","password":"pw"}"#;
        let proxy: Proxy = serde_json::from_str(json).unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Ss);
        assert_eq!(proxy.params["cipher"], Value::from("aes-256-gcm"));

        let other: ProxyType = "tuic".parse().unwrap();
        assert_eq!(other, ProxyType::Other("tuic".into()));
        assert_eq!(other.to_string(), "tuic");
    }
}
