use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gnm_common::types::{CheckKind, Meta};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use crate::{elapsed_ms, CheckResult, CheckTarget, Probe, ProbeOutcome, ProbeTimeouts, Thresholds};

/// TLS handshake and leaf-certificate expiry check.
///
/// An expired certificate is not a transient condition, so it escalates to
/// critical immediately; handshake failures stay subject to the two-strike
/// confirmation like any other hard failure.
pub struct SslCertProbe {
    connector: TlsConnector,
    connect_timeout: Duration,
    warn_days: i64,
}

impl SslCertProbe {
    pub fn new(timeouts: &ProbeTimeouts, thresholds: &Thresholds) -> Self {
        // Idempotent; makes the builder below unambiguous even when another
        // crate in the process links a second crypto provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Self {
            connector: TlsConnector::from(Arc::new(config)),
            connect_timeout: Duration::from_secs(timeouts.tcp_timeout_sec),
            warn_days: thresholds.ssl_warn_days,
        }
    }
}

#[async_trait]
impl Probe for SslCertProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::SslCert
    }

    async fn run(&self, target: &CheckTarget) -> CheckResult {
        let (host, port) = match target {
            CheckTarget::SslCert { host, port } => (host, *port),
            other => {
                return CheckResult::internal_error(format!("ssl_cert probe got {other:?}"));
            }
        };

        let mut meta = Meta::new();
        meta.insert("port".into(), port.into());

        let server_name = match ServerName::try_from(host.clone()) {
            Ok(name) => name,
            Err(e) => {
                return CheckResult::hard_fail(0, meta, format!("invalid server name: {e}"));
            }
        };

        let start = Instant::now();

        let stream = match timeout(self.connect_timeout, TcpStream::connect((host.as_str(), port)))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return CheckResult::hard_fail(elapsed_ms(start), meta, e),
            Err(_) => {
                meta.insert("reason".into(), "timeout".into());
                return CheckResult::hard_fail(elapsed_ms(start), meta, "connect timeout");
            }
        };

        let tls_stream = match timeout(
            self.connect_timeout,
            self.connector.connect(server_name, stream),
        )
        .await
        {
            Ok(Ok(tls_stream)) => tls_stream,
            Ok(Err(e)) => {
                let latency_ms = elapsed_ms(start);
                if is_expired_error(&e) {
                    // The peer presented a certificate that is already past
                    // its notAfter; the verifier rejected the handshake.
                    meta.insert("cert_expired".into(), true.into());
                    let mut result = CheckResult::hard_fail(latency_ms, meta, e);
                    result.outcome = ProbeOutcome::ConfirmedFail;
                    return result;
                }
                return CheckResult::hard_fail(latency_ms, meta, e);
            }
            Err(_) => {
                meta.insert("reason".into(), "timeout".into());
                return CheckResult::hard_fail(elapsed_ms(start), meta, "handshake timeout");
            }
        };
        let latency_ms = elapsed_ms(start);

        let (_, connection) = tls_stream.get_ref();
        let certs = match connection.peer_certificates() {
            Some(certs) if !certs.is_empty() => certs,
            _ => return CheckResult::hard_fail(latency_ms, meta, "no peer certificates"),
        };

        let leaf = match X509Certificate::from_der(certs[0].as_ref()) {
            Ok((_, cert)) => cert,
            Err(e) => {
                return CheckResult::hard_fail(
                    latency_ms,
                    meta,
                    format!("failed to parse certificate: {e}"),
                );
            }
        };

        let now = Utc::now();
        let not_after = DateTime::from_timestamp(leaf.validity().not_after.timestamp(), 0)
            .unwrap_or_default();
        let days_until_expiry = (not_after - now).num_days();

        meta.insert("not_after".into(), not_after.to_rfc3339().into());
        meta.insert("days_until_expiry".into(), days_until_expiry.into());
        if let Some(cn) = common_name(leaf.issuer()) {
            meta.insert("issuer_cn".into(), cn.into());
        }
        if let Some(cn) = common_name(leaf.subject()) {
            meta.insert("subject_cn".into(), cn.into());
        }

        if now > not_after {
            meta.insert("cert_expired".into(), true.into());
            let mut result =
                CheckResult::hard_fail(latency_ms, meta, "certificate expired");
            result.outcome = ProbeOutcome::ConfirmedFail;
            return result;
        }

        if days_until_expiry <= self.warn_days {
            meta.insert("reason".into(), "cert_expiring".into());
            return CheckResult::degraded(latency_ms, meta);
        }

        CheckResult::ok(latency_ms, meta)
    }
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
}

fn is_expired_error(e: &std::io::Error) -> bool {
    let Some(inner) = e.get_ref() else {
        return false;
    };
    let Some(tls) = inner.downcast_ref::<rustls::Error>() else {
        return false;
    };
    matches!(
        tls,
        rustls::Error::InvalidCertificate(rustls::CertificateError::Expired)
            | rustls::Error::InvalidCertificate(rustls::CertificateError::ExpiredContext { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_a_hard_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = SslCertProbe::new(&ProbeTimeouts::default(), &Thresholds::default());
        let result = probe
            .run(&CheckTarget::SslCert {
                host: "localhost".into(),
                port,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::HardFail);
        assert_eq!(result.meta["port"], port);
    }

    #[tokio::test]
    async fn plaintext_peer_fails_the_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                use tokio::io::AsyncWriteExt;
                let _ = stream.write_all(b"not a tls server\r\n").await;
            }
        });

        let probe = SslCertProbe::new(&ProbeTimeouts::default(), &Thresholds::default());
        let result = probe
            .run(&CheckTarget::SslCert {
                host: "localhost".into(),
                port,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::HardFail);
        assert!(result.meta.contains_key("error"));
    }

    #[tokio::test]
    #[ignore] // needs outbound network access
    async fn live_site_reports_expiry_fields() {
        let probe = SslCertProbe::new(&ProbeTimeouts::default(), &Thresholds::default());
        let result = probe
            .run(&CheckTarget::SslCert {
                host: "example.com".into(),
                port: 443,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::Ok);
        assert!(result.meta.contains_key("not_after"));
        assert!(result.meta.contains_key("days_until_expiry"));
        assert!(result.meta.contains_key("issuer_cn"));
    }
}
