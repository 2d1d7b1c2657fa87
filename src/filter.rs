//! Provider filtering pipeline.
//!
//! A [`FilterQuery`] is turned into a fixed sequence of stages. Each proxy runs
//! through them in order and is dropped at the first stage that rejects it, so
//! later stages never touch its name. The last stage keeps the speed
//! annotation in the display name in sync with the registry.

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::Deserialize;

use crate::proxy::Proxy;
use crate::stats::StatRegistry;

/// Separator between a display name and its speed annotation.
pub const SPEED_SEPARATOR: &str = " |";

const DEFAULT_SPEED_MIN: f64 = 0.0;
const DEFAULT_SPEED_MAX: f64 = 1000.0;
const WILDCARD: &str = "all";

lazy_static! {
    static ref NETFLIX: Regex = Regex::new("NF|奈飞|解锁|Netflix|NETFLIX|netflix").unwrap();
    static ref DISNEY: Regex = Regex::new(r"D\+|Disney|disney|迪士尼").unwrap();
}

/// Query fields as the serving layer receives them: comma-separated strings,
/// empty meaning unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawQuery {
    #[serde(rename = "type")]
    pub types: String,
    pub country: String,
    pub not_country: String,
    pub speed: String,
    pub filter: String,
    pub stream: String,
    pub not_stream: String,
}

/// Streaming services detectable from a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamService {
    Netflix,
    Disney,
}

impl StreamService {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "netflix" => Some(StreamService::Netflix),
            "disney" => Some(StreamService::Disney),
            _ => None,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            StreamService::Netflix => NETFLIX.is_match(name),
            StreamService::Disney => DISNEY.is_match(name),
        }
    }
}

/// Relay/Pool gating codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCode {
    /// `r`: name must contain "Relay".
    Relay,
    /// `p`: name must contain "Pool".
    Pool,
    /// `rp`: name must contain either.
    RelayOrPool,
    /// `nr`
    NoRelay,
    /// `np`
    NoPool,
    /// `nrp`: name must contain neither.
    NoRelayNorPool,
}

impl FilterCode {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(FilterCode::Relay),
            "p" => Some(FilterCode::Pool),
            "rp" => Some(FilterCode::RelayOrPool),
            "nr" => Some(FilterCode::NoRelay),
            "np" => Some(FilterCode::NoPool),
            "nrp" => Some(FilterCode::NoRelayNorPool),
            _ => None,
        }
    }

    fn accepts(&self, name: &str) -> bool {
        let relay = name.contains("Relay");
        let pool = name.contains("Pool");
        match self {
            FilterCode::Relay => relay,
            FilterCode::Pool => pool,
            FilterCode::RelayOrPool => relay || pool,
            FilterCode::NoRelay => !relay,
            FilterCode::NoPool => !pool,
            FilterCode::NoRelayNorPool => !relay && !pool,
        }
    }
}

/// Requested speed window in Mb. Bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedRange {
    pub min: f64,
    pub max: f64,
}

impl Default for SpeedRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_SPEED_MIN,
            max: DEFAULT_SPEED_MAX,
        }
    }
}

impl SpeedRange {
    /// Parse `"min"` or `"min,max"`. Returns `None` when no minimum was given.
    /// Unparsable values fall back to the full 0..1000 window.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split(',').collect();
        if parts[0].trim().is_empty() {
            return None;
        }

        let mut range = SpeedRange::default();
        match parts.as_slice() {
            [min] => range.min = parse_bound(min, DEFAULT_SPEED_MIN),
            [min, max] => {
                range.min = parse_bound(min, DEFAULT_SPEED_MIN);
                range.max = parse_bound(max, DEFAULT_SPEED_MAX);
            }
            _ => {}
        }
        Some(range)
    }

    fn contains(&self, speed: f64) -> bool {
        speed > self.min && speed < self.max
    }
}

fn parse_bound(raw: &str, default: f64) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if !value.is_nan() => value,
        _ => default,
    }
}

/// Declarative selection over a proxy list. Empty fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterQuery {
    pub types: Vec<String>,
    pub countries: Vec<String>,
    pub not_countries: Vec<String>,
    pub code: Option<FilterCode>,
    pub streams: Vec<StreamService>,
    pub not_streams: Vec<StreamService>,
    pub speed: Option<SpeedRange>,
}

impl FilterQuery {
    pub fn from_raw(raw: &RawQuery) -> Self {
        Self {
            types: split_tokens(&raw.types),
            countries: split_tokens(&raw.country),
            not_countries: split_tokens(&raw.not_country),
            code: FilterCode::from_code(raw.filter.trim()),
            streams: stream_services(&raw.stream),
            not_streams: stream_services(&raw.not_stream),
            speed: SpeedRange::parse(&raw.speed),
        }
    }

    /// Active stages in evaluation order.
    fn stages(&self, registry: &StatRegistry) -> Vec<Stage<'_>> {
        let mut stages = Vec::with_capacity(7);
        if !self.types.is_empty() && !is_wildcard(&self.types) {
            stages.push(Stage::Type(&self.types));
        }
        if !self.streams.is_empty() {
            stages.push(Stage::StreamAllow(&self.streams));
        }
        if !self.not_streams.is_empty() {
            stages.push(Stage::StreamDeny(&self.not_streams));
        }
        if !self.not_countries.is_empty() {
            stages.push(Stage::CountryDeny(&self.not_countries));
        }
        if !self.countries.is_empty() && !is_wildcard(&self.countries) {
            stages.push(Stage::CountryAllow(&self.countries));
        }
        if let Some(code) = self.code {
            stages.push(Stage::Code(code));
        }
        match self.speed {
            Some(range) if registry.speed_exists() => stages.push(Stage::Speed(range)),
            _ => stages.push(Stage::StripAnnotation),
        }
        stages
    }
}

impl From<&RawQuery> for FilterQuery {
    fn from(raw: &RawQuery) -> Self {
        FilterQuery::from_raw(raw)
    }
}

enum Stage<'q> {
    Type(&'q [String]),
    StreamAllow(&'q [StreamService]),
    StreamDeny(&'q [StreamService]),
    CountryDeny(&'q [String]),
    CountryAllow(&'q [String]),
    Code(FilterCode),
    Speed(SpeedRange),
    StripAnnotation,
}

impl Stage<'_> {
    /// Returns whether the proxy is kept. May rewrite the display name.
    fn apply(&self, proxy: &mut Proxy, registry: &StatRegistry) -> bool {
        match self {
            Stage::Type(types) => types.iter().any(|t| t == proxy.proxy_type.as_str()),
            Stage::StreamAllow(services) => services.iter().any(|s| s.matches(&proxy.name)),
            Stage::StreamDeny(services) => !services.iter().any(|s| s.matches(&proxy.name)),
            Stage::CountryDeny(countries) => !countries.iter().any(|c| proxy.name.contains(c.as_str())),
            Stage::CountryAllow(countries) => countries.iter().any(|c| proxy.name.contains(c.as_str())),
            Stage::Code(code) => code.accepts(&proxy.name),
            Stage::Speed(range) => {
                strip_speed_annotation(&mut proxy.name);
                match registry.find(&proxy.id()) {
                    Some(stat) if stat.speed != 0.0 => {
                        if !range.contains(stat.speed) {
                            return false;
                        }
                        proxy.name.push_str(&speed_annotation(stat.speed));
                        true
                    }
                    // Unmeasured proxies only pass an open-ended minimum.
                    _ => range.min == 0.0,
                }
            }
            Stage::StripAnnotation => {
                strip_speed_annotation(&mut proxy.name);
                true
            }
        }
    }
}

/// Select the proxies matching `query`, in input order.
///
/// Display names are rewritten in `proxies` itself, which is the shared pool
/// snapshot; the kept proxies are returned as copies and their request count
/// is bumped in the registry.
pub fn filter(proxies: &mut [Proxy], query: &FilterQuery, registry: &StatRegistry) -> Vec<Proxy> {
    match proxies.first() {
        Some(first) if first.is_valid() => {}
        _ => {
            warn!("provider: nothing to provide");
            return Vec::new();
        }
    }

    let stages = query.stages(registry);
    let mut kept = Vec::new();
    for proxy in proxies.iter_mut() {
        if !stages.iter().all(|stage| stage.apply(proxy, registry)) {
            continue;
        }
        registry.increment_request_count(&proxy.id());
        kept.push(proxy.clone());
    }
    kept
}

/// Speed annotation appended to a display name, e.g. `" |12.30Mb"`.
pub fn speed_annotation(speed: f64) -> String {
    format!("{}{:5.2}Mb", SPEED_SEPARATOR, speed)
}

/// Cut the name at the first speed separator, if any.
pub fn strip_speed_annotation(name: &mut String) {
    if let Some(idx) = name.find(SPEED_SEPARATOR) {
        name.truncate(idx);
    }
}

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn stream_services(raw: &str) -> Vec<StreamService> {
    split_tokens(raw)
        .iter()
        .filter_map(|tag| StreamService::from_tag(tag))
        .collect()
}

/// The wildcard only applies when it is the whole field.
fn is_wildcard(tokens: &[String]) -> bool {
    matches!(tokens, [only] if only == WILDCARD)
}
