use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON object attached to every measurement (`meta_json` column).
pub type Meta = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Ping,
    Http,
    Dns,
    Tcp,
    SslCert,
    JsonApi,
}

impl CheckKind {
    pub const ALL: [CheckKind; 6] = [
        CheckKind::Ping,
        CheckKind::Http,
        CheckKind::Dns,
        CheckKind::Tcp,
        CheckKind::SslCert,
        CheckKind::JsonApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Ping => "ping",
            CheckKind::Http => "http",
            CheckKind::Dns => "dns",
            CheckKind::Tcp => "tcp",
            CheckKind::SslCert => "ssl_cert",
            CheckKind::JsonApi => "json_api",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(CheckKind::Ping),
            "http" => Ok(CheckKind::Http),
            "dns" => Ok(CheckKind::Dns),
            "tcp" => Ok(CheckKind::Tcp),
            "ssl_cert" => Ok(CheckKind::SslCert),
            "json_api" => Ok(CheckKind::JsonApi),
            _ => Err(format!("unknown check type: {s}")),
        }
    }
}

/// Persisted measurement status. The numeric codes are part of the write
/// contract with the measurements table and the read API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckStatus {
    Ok,
    Warn,
    Crit,
}

impl CheckStatus {
    pub fn code(self) -> i16 {
        match self {
            CheckStatus::Ok => 0,
            CheckStatus::Warn => 1,
            CheckStatus::Crit => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(CheckStatus::Ok),
            1 => Some(CheckStatus::Warn),
            2 => Some(CheckStatus::Crit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Crit => "crit",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CheckStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.code())
    }
}

impl<'de> Deserialize<'de> for CheckStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i16::deserialize(deserializer)?;
        CheckStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid status code: {code}")))
    }
}

/// One entry of the service catalog (`services.json`). `params` stays raw
/// here; it is parsed into [`CheckParams`] during config validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    pub service_id: String,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CheckKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

/// One entry of the host catalog (`hosts.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct HostSpec {
    pub host_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsParams {
    /// Record type to query. A and AAAA are supported.
    #[serde(default = "default_record")]
    pub record: String,
}

fn default_record() -> String {
    "A".to_string()
}

impl Default for DnsParams {
    fn default() -> Self {
        Self {
            record: default_record(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpParams {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SslCertParams {
    #[serde(default = "default_tls_port")]
    pub port: u16,
}

fn default_tls_port() -> u16 {
    443
}

impl Default for SslCertParams {
    fn default() -> Self {
        Self {
            port: default_tls_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonApiParams {
    pub url: String,
    /// Dotted path that must exist in the response document.
    #[serde(default)]
    pub expect_field: Option<String>,
    /// Expected value at `expect_field` (defaults to existence check).
    #[serde(default)]
    pub expect_equals: Option<serde_json::Value>,
}

/// Per-type check parameters, validated from the raw `params` object.
/// Unknown fields are rejected so that a typo in the service catalog fails
/// at startup instead of silently changing probe behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckParams {
    Ping,
    Http(HttpParams),
    Dns(DnsParams),
    Tcp(TcpParams),
    SslCert(SslCertParams),
    JsonApi(JsonApiParams),
}

impl CheckParams {
    pub fn parse(kind: CheckKind, raw: &serde_json::Value) -> anyhow::Result<Self> {
        let empty = serde_json::Value::Object(serde_json::Map::new());
        let raw = if raw.is_null() { &empty } else { raw };
        let parsed = match kind {
            CheckKind::Ping => {
                let obj = raw
                    .as_object()
                    .context("params must be an object")?;
                if !obj.is_empty() {
                    anyhow::bail!("ping checks take no params, got: {:?}", obj.keys());
                }
                CheckParams::Ping
            }
            CheckKind::Http => CheckParams::Http(serde_json::from_value(raw.clone())?),
            CheckKind::Dns => CheckParams::Dns(serde_json::from_value(raw.clone())?),
            CheckKind::Tcp => CheckParams::Tcp(serde_json::from_value(raw.clone())?),
            CheckKind::SslCert => CheckParams::SslCert(serde_json::from_value(raw.clone())?),
            CheckKind::JsonApi => CheckParams::JsonApi(serde_json::from_value(raw.clone())?),
        };
        Ok(parsed)
    }
}

/// Which resolution path produced the probe identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Env,
    Geo,
    Config,
}

impl std::fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentitySource::Env => write!(f, "env"),
            IdentitySource::Geo => write!(f, "geo"),
            IdentitySource::Config => write!(f, "config"),
        }
    }
}

/// Identity of the probing vantage point, resolved once at startup and
/// stamped into every measurement's meta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeIdentity {
    pub region: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub public_ip: Option<String>,
    pub source: IdentitySource,
}

impl ProbeIdentity {
    pub fn apply_to_meta(&self, meta: &mut Meta) {
        meta.insert("probe_region".into(), self.region.clone().into());
        meta.insert(
            "probe_country".into(),
            self.country.clone().map_or(serde_json::Value::Null, Into::into),
        );
        meta.insert(
            "probe_city".into(),
            self.city.clone().map_or(serde_json::Value::Null, Into::into),
        );
        meta.insert(
            "probe_public_ip".into(),
            self.public_ip.clone().map_or(serde_json::Value::Null, Into::into),
        );
        meta.insert("probe_source".into(), self.source.to_string().into());
    }
}

/// The immutable telemetry record appended once per completed check.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub ts: DateTime<Utc>,
    pub region: String,
    pub project_id: Option<i64>,
    pub target_id: String,
    pub host_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CheckKind,
    pub status: CheckStatus,
    pub latency_ms: u64,
    pub meta: Option<Meta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_kind_round_trips_through_str() {
        for kind in CheckKind::ALL {
            assert_eq!(kind.as_str().parse::<CheckKind>().unwrap(), kind);
        }
    }

    #[test]
    fn check_status_codes() {
        assert_eq!(CheckStatus::Ok.code(), 0);
        assert_eq!(CheckStatus::Warn.code(), 1);
        assert_eq!(CheckStatus::Crit.code(), 2);
        assert_eq!(CheckStatus::from_code(2), Some(CheckStatus::Crit));
        assert_eq!(CheckStatus::from_code(7), None);
    }

    #[test]
    fn service_spec_defaults() {
        let spec: ServiceSpec = serde_json::from_str(
            r#"{"service_id": "web01_http", "host_id": "web01", "type": "http"}"#,
        )
        .unwrap();
        assert!(spec.enabled);
        assert_eq!(spec.kind, CheckKind::Http);
        assert!(spec.project_id.is_none());
        assert!(spec.params.is_null());
    }

    #[test]
    fn tcp_params_require_port() {
        let err = CheckParams::parse(CheckKind::Tcp, &serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("port"));

        let parsed =
            CheckParams::parse(CheckKind::Tcp, &serde_json::json!({"port": 5432})).unwrap();
        assert_eq!(parsed, CheckParams::Tcp(TcpParams { port: 5432 }));
    }

    #[test]
    fn unknown_param_fields_are_rejected() {
        let err = CheckParams::parse(
            CheckKind::Http,
            &serde_json::json!({"url": "https://example.com", "ulr_typo": "x"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("ulr_typo"));
    }

    #[test]
    fn ping_params_must_be_empty() {
        assert!(CheckParams::parse(CheckKind::Ping, &serde_json::Value::Null).is_ok());
        assert!(CheckParams::parse(CheckKind::Ping, &serde_json::json!({})).is_ok());
        assert!(CheckParams::parse(CheckKind::Ping, &serde_json::json!({"port": 1})).is_err());
    }

    #[test]
    fn ssl_cert_port_defaults_to_443() {
        let parsed = CheckParams::parse(CheckKind::SslCert, &serde_json::json!({})).unwrap();
        assert_eq!(parsed, CheckParams::SslCert(SslCertParams { port: 443 }));
    }

    #[test]
    fn identity_meta_fields_always_present() {
        let identity = ProbeIdentity {
            region: "EU".into(),
            country: Some("FR".into()),
            city: None,
            public_ip: None,
            source: IdentitySource::Geo,
        };
        let mut meta = Meta::new();
        identity.apply_to_meta(&mut meta);
        for key in [
            "probe_region",
            "probe_country",
            "probe_city",
            "probe_public_ip",
            "probe_source",
        ] {
            assert!(meta.contains_key(key), "missing {key}");
        }
        assert_eq!(meta["probe_source"], "geo");
        assert!(meta["probe_city"].is_null());
    }
}
