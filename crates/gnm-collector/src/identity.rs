use std::time::Duration;

use gnm_common::types::{IdentitySource, ProbeIdentity};
use serde::Deserialize;

pub const ENV_REGION: &str = "GNM_REGION";
pub const ENV_COUNTRY: &str = "GNM_COUNTRY";
pub const ENV_CITY: &str = "GNM_CITY";
pub const ENV_PUBLIC_IP: &str = "GNM_PUBLIC_IP";

/// The geo endpoints are best-effort: single attempt, short timeout, and
/// any failure falls through to the config fallback.
const GEO_TIMEOUT: Duration = Duration::from_secs(3);
const PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";

/// Resolve the probe identity once at startup.
///
/// Order: environment override, then geo-IP discovery, then the region
/// fallback from the main config with the other fields left empty.
pub async fn resolve(region_fallback: &str) -> ProbeIdentity {
    if let Some(identity) = from_env() {
        return identity;
    }
    // The whole discovery is bounded so a stalled endpoint cannot hold up
    // startup beyond the geo budget.
    match tokio::time::timeout(GEO_TIMEOUT, discover_geo()).await {
        Ok(Some(identity)) => return identity,
        Ok(None) => {}
        Err(_) => tracing::debug!("Geo identity discovery timed out"),
    }
    ProbeIdentity {
        region: region_fallback.to_string(),
        country: None,
        city: None,
        public_ip: None,
        source: IdentitySource::Config,
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn from_env() -> Option<ProbeIdentity> {
    let region = env_non_empty(ENV_REGION)?;
    Some(ProbeIdentity {
        region,
        country: env_non_empty(ENV_COUNTRY),
        city: env_non_empty(ENV_CITY),
        public_ip: env_non_empty(ENV_PUBLIC_IP),
        source: IdentitySource::Env,
    })
}

#[derive(Deserialize)]
struct IpifyResponse {
    ip: String,
}

#[derive(Deserialize)]
struct GeoResponse {
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

async fn discover_geo() -> Option<ProbeIdentity> {
    let client = reqwest::Client::builder()
        .timeout(GEO_TIMEOUT)
        .build()
        .ok()?;

    let public_ip = match fetch_public_ip(&client).await {
        Ok(ip) => ip,
        Err(e) => {
            tracing::debug!(error = %e, "Public IP discovery failed");
            return None;
        }
    };

    let geo = match fetch_geo(&client, &public_ip).await {
        Ok(geo) => geo,
        Err(e) => {
            tracing::debug!(ip = %public_ip, error = %e, "Geo lookup failed");
            GeoResponse {
                country_code: None,
                country: None,
                city: None,
            }
        }
    };

    let country = geo
        .country_code
        .or(geo.country)
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| !c.is_empty());
    let region = country
        .as_deref()
        .map_or("UNKNOWN", country_to_region)
        .to_string();

    Some(ProbeIdentity {
        region,
        country,
        city: geo.city,
        public_ip: Some(public_ip),
        source: IdentitySource::Geo,
    })
}

async fn fetch_public_ip(client: &reqwest::Client) -> reqwest::Result<String> {
    let response: IpifyResponse = client
        .get(PUBLIC_IP_URL)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(response.ip)
}

async fn fetch_geo(client: &reqwest::Client, ip: &str) -> reqwest::Result<GeoResponse> {
    client
        .get(format!("https://ipapi.co/{ip}/json/"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

/// Map an ISO country code to the coarse continent region tag used to
/// distinguish collectors sharing one datastore.
pub fn country_to_region(country_code: &str) -> &'static str {
    const EU: &[&str] = &[
        "FR", "ES", "PT", "BE", "NL", "DE", "LU", "IT", "GB", "IE", "CH", "AT", "SE", "NO",
        "DK", "FI", "PL", "CZ", "SK", "HU", "RO", "BG", "GR", "HR", "SI", "EE", "LV", "LT",
    ];
    const NA: &[&str] = &["US", "CA", "MX"];
    const SA: &[&str] = &["BR", "AR", "CL", "CO", "PE", "UY", "PY", "BO", "EC", "VE"];
    const AF: &[&str] = &[
        "MA", "DZ", "TN", "EG", "ZA", "NG", "KE", "GH", "SN", "CI", "CM", "ET", "UG", "TZ",
        "RW",
    ];
    const AS: &[&str] = &[
        "TR", "SA", "AE", "QA", "KW", "OM", "BH", "IN", "PK", "BD", "CN", "JP", "KR", "SG",
        "MY", "TH", "VN", "ID", "PH", "HK", "TW",
    ];
    const OC: &[&str] = &["AU", "NZ"];

    let cc = country_code.to_ascii_uppercase();
    let cc = cc.as_str();
    if cc.is_empty() {
        return "UNKNOWN";
    }
    if EU.contains(&cc) {
        "EU"
    } else if NA.contains(&cc) {
        "NA"
    } else if SA.contains(&cc) {
        "SA"
    } else if AF.contains(&cc) {
        "AF"
    } else if AS.contains(&cc) {
        "AS"
    } else if OC.contains(&cc) {
        "OC"
    } else {
        "OTHER"
    }
}
