use std::time::{Duration, Instant};

use async_trait::async_trait;
use gnm_common::types::{CheckKind, Meta};

use crate::{
    classify_latency, elapsed_ms, http::USER_AGENT, CheckResult, CheckTarget, Probe,
    ProbeTimeouts, Thresholds,
};

/// On failure the first part of the body is kept in meta for diagnosis.
const BODY_SNIPPET_MAX: usize = 256;

/// JSON API check: GET, parse the body as JSON, then optionally assert
/// that a dotted path exists and/or equals an expected value. A broken
/// endpoint (non-2xx, unparseable body, unmet expectation) is a hard
/// failure, not a degradation.
pub struct JsonApiProbe {
    client: reqwest::Client,
    warn_ms: u64,
    very_slow_ms: u64,
}

impl JsonApiProbe {
    pub fn new(timeouts: &ProbeTimeouts, thresholds: &Thresholds) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeouts.http_timeout_sec))
            .build()?;
        Ok(Self {
            client,
            warn_ms: thresholds.json_warn_ms,
            very_slow_ms: thresholds.json_very_slow_ms,
        })
    }
}

#[async_trait]
impl Probe for JsonApiProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::JsonApi
    }

    async fn run(&self, target: &CheckTarget) -> CheckResult {
        let (url, expect_field, expect_equals) = match target {
            CheckTarget::JsonApi {
                url,
                expect_field,
                expect_equals,
            } => (url, expect_field, expect_equals),
            other => {
                return CheckResult::internal_error(format!("json_api probe got {other:?}"));
            }
        };

        let mut meta = Meta::new();
        let start = Instant::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_timeout() {
                    meta.insert("reason".into(), "timeout".into());
                }
                return CheckResult::hard_fail(elapsed_ms(start), meta, e);
            }
        };

        let status = response.status();
        meta.insert("http_status".into(), status.as_u16().into());

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return CheckResult::hard_fail(elapsed_ms(start), meta, e),
        };
        let latency_ms = elapsed_ms(start);

        if !status.is_success() {
            attach_body_snippet(&mut meta, &body);
            return CheckResult::hard_fail(latency_ms, meta, format!("http status {status}"));
        }

        let document: serde_json::Value = match serde_json::from_str(&body) {
            Ok(document) => document,
            Err(e) => {
                attach_body_snippet(&mut meta, &body);
                meta.insert("reason".into(), "json_decode_failed".into());
                return CheckResult::hard_fail(latency_ms, meta, e);
            }
        };

        if let Some(path) = expect_field {
            meta.insert("matched_path".into(), path.clone().into());
            let Some(value) = lookup_path(&document, path) else {
                attach_body_snippet(&mut meta, &body);
                return CheckResult::hard_fail(
                    latency_ms,
                    meta,
                    format!("missing_field:{path}"),
                );
            };
            if let Some(expected) = expect_equals {
                if value != expected {
                    attach_body_snippet(&mut meta, &body);
                    return CheckResult::hard_fail(
                        latency_ms,
                        meta,
                        format!("unexpected value at {path}: got {value}, want {expected}"),
                    );
                }
            }
        } else if let Some(expected) = expect_equals {
            if &document != expected {
                attach_body_snippet(&mut meta, &body);
                return CheckResult::hard_fail(latency_ms, meta, "document mismatch");
            }
        }

        classify_latency(
            latency_ms,
            self.warn_ms,
            self.very_slow_ms,
            "slow_json_api",
            meta,
        )
    }
}

fn attach_body_snippet(meta: &mut Meta, body: &str) {
    let snippet: String = body.chars().take(BODY_SNIPPET_MAX).collect();
    meta.insert("body".into(), snippet.into());
}

/// Resolve a dotted path (`status.db.ok`, `items.0.name`) in a JSON
/// document. Numeric segments index into arrays.
pub fn lookup_path<'a>(
    document: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProbeOutcome;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn lookup_nested_paths() {
        let doc = json!({"status": {"db": {"ok": true}}, "items": [{"name": "a"}]});
        assert_eq!(lookup_path(&doc, "status.db.ok"), Some(&json!(true)));
        assert_eq!(lookup_path(&doc, "items.0.name"), Some(&json!("a")));
        assert_eq!(lookup_path(&doc, "status.missing"), None);
        assert_eq!(lookup_path(&doc, "items.5"), None);
        assert_eq!(lookup_path(&doc, "items.x"), None);
    }

    #[test]
    fn body_snippet_is_bounded() {
        let mut meta = Meta::new();
        attach_body_snippet(&mut meta, &"x".repeat(1000));
        assert_eq!(
            meta["body"].as_str().unwrap().chars().count(),
            BODY_SNIPPET_MAX
        );

        let mut meta = Meta::new();
        attach_body_snippet(&mut meta, "short");
        assert_eq!(meta["body"], "short");
    }

    async fn one_shot_json_server(body: &'static str) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    fn probe() -> JsonApiProbe {
        JsonApiProbe::new(&ProbeTimeouts::default(), &Thresholds::default()).unwrap()
    }

    #[tokio::test]
    async fn expectation_met_reports_ok() {
        let port = one_shot_json_server(r#"{"status": "healthy", "version": 3}"#).await;
        let result = probe()
            .run(&CheckTarget::JsonApi {
                url: format!("http://127.0.0.1:{port}/api/health"),
                expect_field: Some("status".into()),
                expect_equals: Some(json!("healthy")),
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::Ok);
        assert_eq!(result.meta["matched_path"], "status");
        assert_eq!(result.meta["http_status"], 200);
    }

    #[tokio::test]
    async fn missing_expected_field_is_a_hard_failure() {
        let port = one_shot_json_server(r#"{"version": 3}"#).await;
        let result = probe()
            .run(&CheckTarget::JsonApi {
                url: format!("http://127.0.0.1:{port}/api/health"),
                expect_field: Some("status".into()),
                expect_equals: None,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::HardFail);
        assert!(result.meta["error"]
            .as_str()
            .unwrap()
            .contains("missing_field:status"));
        assert!(result.meta.contains_key("body"));
    }

    #[tokio::test]
    async fn unparseable_body_is_a_hard_failure() {
        let port = one_shot_json_server("<html>definitely not json</html>").await;
        let result = probe()
            .run(&CheckTarget::JsonApi {
                url: format!("http://127.0.0.1:{port}/"),
                expect_field: None,
                expect_equals: None,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::HardFail);
        assert_eq!(result.meta["reason"], "json_decode_failed");
    }
}
