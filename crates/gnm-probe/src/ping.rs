use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gnm_common::types::{CheckKind, Meta};
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use crate::{
    classify_latency, elapsed_ms, CheckResult, CheckTarget, Probe, ProbeTimeouts, Thresholds,
};

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Whether native ICMP sockets are available to this process. Probed once;
/// the answer cannot change without restarting the process.
static NATIVE_ICMP: OnceLock<bool> = OnceLock::new();

#[derive(Debug)]
enum PingError {
    PermissionDenied(String),
    Timeout,
    Network(String),
    Command(String),
}

impl std::fmt::Display for PingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingError::PermissionDenied(e) => write!(f, "permission denied: {e}"),
            PingError::Timeout => write!(f, "no reply within timeout"),
            PingError::Network(e) => write!(f, "{e}"),
            PingError::Command(e) => write!(f, "{e}"),
        }
    }
}

fn detect_native_icmp() -> bool {
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where
    // ping_group_range allows it.
    let available = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok()
        || Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok();
    if available {
        tracing::info!("Ping probe: native ICMP sockets available");
    } else {
        tracing::info!("Ping probe: native ICMP unavailable, using ping command fallback");
    }
    available
}

/// ICMP echo check. Prefers native ICMP sockets (run inside
/// `spawn_blocking` so the reply wait cannot stall the runtime) and falls
/// back to the OS `ping` tool when socket creation is denied.
pub struct PingProbe {
    reply_timeout: Duration,
    warn_ms: u64,
    very_slow_ms: u64,
}

impl PingProbe {
    pub fn new(timeouts: &ProbeTimeouts, thresholds: &Thresholds) -> Self {
        Self {
            reply_timeout: Duration::from_secs(timeouts.ping_timeout_sec),
            warn_ms: thresholds.ping_warn_ms,
            very_slow_ms: thresholds.ping_very_slow_ms,
        }
    }

    async fn ping_native(&self, ip: IpAddr) -> Result<u64, PingError> {
        let reply_timeout = self.reply_timeout;
        tokio::task::spawn_blocking(move || blocking_icmp_echo(ip, reply_timeout))
            .await
            .map_err(|e| PingError::Network(format!("ping task join failed: {e}")))?
    }
}

#[async_trait]
impl Probe for PingProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::Ping
    }

    async fn run(&self, target: &CheckTarget) -> CheckResult {
        let host = match target {
            CheckTarget::Ping { host } => host,
            other => {
                return CheckResult::internal_error(format!("ping probe got {other:?}"));
            }
        };

        let mut meta = Meta::new();
        let start = Instant::now();

        let ip = match resolve_host(host).await {
            Ok(ip) => ip,
            Err(e) => return CheckResult::hard_fail(elapsed_ms(start), meta, e),
        };

        if *NATIVE_ICMP.get_or_init(detect_native_icmp) {
            match self.ping_native(ip).await {
                Ok(rtt_ms) => {
                    meta.insert("mode".into(), "icmp".into());
                    return classify_latency(
                        rtt_ms,
                        self.warn_ms,
                        self.very_slow_ms,
                        "slow_ping",
                        meta,
                    );
                }
                Err(PingError::Timeout) => {
                    meta.insert("mode".into(), "icmp".into());
                    meta.insert("reason".into(), "timeout".into());
                    return CheckResult::hard_fail(elapsed_ms(start), meta, PingError::Timeout);
                }
                Err(PingError::PermissionDenied(e)) => {
                    // Unprivileged environment; fall through to the command.
                    tracing::debug!(host = %host, error = %e, "Native ICMP denied, using ping command");
                }
                Err(e) => {
                    meta.insert("mode".into(), "icmp".into());
                    return CheckResult::hard_fail(elapsed_ms(start), meta, e);
                }
            }
        }

        meta.insert("mode".into(), "command".into());
        match ping_command(host, self.reply_timeout).await {
            Ok(rtt_ms) => {
                classify_latency(rtt_ms, self.warn_ms, self.very_slow_ms, "slow_ping", meta)
            }
            Err(PingError::Timeout) => {
                meta.insert("reason".into(), "timeout".into());
                CheckResult::hard_fail(elapsed_ms(start), meta, PingError::Timeout)
            }
            Err(e) => CheckResult::hard_fail(elapsed_ms(start), meta, e),
        }
    }
}

async fn resolve_host(host: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host(format!("{host}:0"))
        .await
        .map_err(|e| format!("resolution failed for {host}: {e}"))?;
    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| format!("no addresses for {host}"))
}

fn blocking_icmp_echo(ip: IpAddr, reply_timeout: Duration) -> Result<u64, PingError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                PingError::PermissionDenied(e.to_string())
            } else {
                PingError::Network(format!("failed to create ICMP socket: {e}"))
            }
        })?;

    socket
        .set_read_timeout(Some(reply_timeout))
        .and_then(|_| socket.set_write_timeout(Some(reply_timeout)))
        .map_err(|e| PingError::Network(format!("failed to set socket timeout: {e}")))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| PingError::Network(format!("failed to connect ICMP socket: {e}")))?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(ip.is_ipv4(), identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            PingError::PermissionDenied(e.to_string())
        } else {
            PingError::Network(format!("failed to send echo request: {e}"))
        }
    })?;

    // Wait for our own reply; other ICMP traffic may arrive on RAW sockets.
    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = [MaybeUninit::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut
            {
                PingError::Timeout
            } else {
                PingError::Network(format!("failed to receive echo reply: {e}"))
            }
        })?;
        let elapsed = start.elapsed();
        if elapsed >= reply_timeout {
            return Err(PingError::Timeout);
        }

        // SAFETY: recv initialized the first `len` bytes.
        let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        if is_matching_reply(data, ip.is_ipv4(), identifier, sequence) {
            return Ok(elapsed.as_millis() as u64);
        }
    }
}

/// Echo request: 8-byte ICMP header + 56-byte payload. The v6 checksum is
/// filled in by the kernel.
fn build_echo_request(ipv4: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = if ipv4 { 8 } else { 128 };
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    if ipv4 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

fn is_matching_reply(data: &[u8], ipv4: bool, identifier: u16, sequence: u16) -> bool {
    // RAW v4 sockets deliver the IP header too; DGRAM and v6 do not.
    let offset = if ipv4 && data.first().is_some_and(|b| b >> 4 == 4) {
        20
    } else {
        0
    };
    if data.len() < offset + 8 {
        return false;
    }
    let expected_type = if ipv4 { 0 } else { 129 };
    let reply_id = u16::from_be_bytes([data[offset + 4], data[offset + 5]]);
    let reply_seq = u16::from_be_bytes([data[offset + 6], data[offset + 7]]);
    data[offset] == expected_type && reply_id == identifier && reply_seq == sequence
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let Some(&last) = chunks.remainder().first() {
        sum += u32::from(last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}

async fn ping_command(host: &str, reply_timeout: Duration) -> Result<u64, PingError> {
    let timeout_secs = reply_timeout.as_secs().max(1);
    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), host])
        .output()
        .await
        .map_err(|e| PingError::Command(format!("failed to execute ping: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        if stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(PingError::Timeout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(PingError::Command(format!("ping failed: {detail}")));
    }

    parse_ping_output(&stdout)
}

/// Extract the RTT from ping output; the per-packet `time=` line is
/// preferred, falling back to the summary line (macOS and Linux formats).
fn parse_ping_output(output: &str) -> Result<u64, PingError> {
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();

    let per_packet =
        PER_PACKET.get_or_init(|| Regex::new(r"time[=<]([0-9.]+)\s*ms").unwrap());
    if let Some(caps) = per_packet.captures(output) {
        if let Ok(ms) = caps[1].parse::<f64>() {
            return Ok(ms.round() as u64);
        }
    }

    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/\w+\s*=\s*[0-9.]+/([0-9.]+)/").unwrap()
    });
    if let Some(caps) = summary.captures(output) {
        if let Ok(ms) = caps[1].parse::<f64>() {
            return Ok(ms.round() as u64);
        }
    }

    Err(PingError::Command(format!(
        "failed to parse ping output: {output}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_layout() {
        let packet = build_echo_request(true, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..6], &[0x12, 0x34]);
        assert_eq!(&packet[6..8], &[0x00, 0x01]);
        // v4 checksum must be filled in
        assert_ne!(&packet[2..4], &[0, 0]);

        let v6 = build_echo_request(false, 0x1234, 0x0001);
        assert_eq!(v6[0], 128);
        // v6 checksum is left to the kernel
        assert_eq!(&v6[2..4], &[0, 0]);
    }

    #[test]
    fn checksum_verifies_to_zero() {
        let packet = build_echo_request(true, 0xBEEF, 7);
        // Re-summing a packet with a correct checksum folds to zero.
        let mut sum: u32 = 0;
        for chunk in packet.chunks_exact(2) {
            sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        assert_eq!(sum, 0xFFFF);
    }

    #[test]
    fn reply_matching_handles_raw_and_dgram_frames() {
        let mut icmp = vec![0u8; 8];
        icmp[4..6].copy_from_slice(&0x1234u16.to_be_bytes());
        icmp[6..8].copy_from_slice(&5u16.to_be_bytes());
        assert!(is_matching_reply(&icmp, true, 0x1234, 5));
        assert!(!is_matching_reply(&icmp, true, 0x1234, 6));

        // Same reply behind an IPv4 header (RAW socket framing).
        let mut framed = vec![0u8; 28];
        framed[0] = 0x45;
        framed[20..28].copy_from_slice(&icmp);
        assert!(is_matching_reply(&framed, true, 0x1234, 5));
    }

    #[test]
    fn parse_per_packet_time() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms";
        assert_eq!(parse_ping_output(output).unwrap(), 12);
    }

    #[test]
    fn parse_linux_summary() {
        let output = "\
PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.

--- 8.8.8.8 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 17.100/17.906/18.400/0.300 ms";
        assert_eq!(parse_ping_output(output).unwrap(), 18);
    }

    #[test]
    fn parse_macos_summary() {
        let output = "\
--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms";
        assert_eq!(parse_ping_output(output).unwrap(), 18);
    }

    #[test]
    fn unparseable_output_is_an_error() {
        assert!(parse_ping_output("garbage").is_err());
    }
}
