//! Protocol-level heartbeat handling.
//!
//! A STOMP heartbeat is a bare LF on the wire, distinct from any
//! transport-level ping/pong keepalive. Detection runs before generic
//! frame parsing so a heartbeat is never fed to the codec as a frame.

/// The heartbeat wire representation: exactly one LF.
pub const HEARTBEAT: &[u8] = b"\n";

/// Whether a complete wire message is a heartbeat.
pub fn is_heartbeat(message: &[u8]) -> bool {
    message == HEARTBEAT
}

/// Format the `heart-beat` header sent at CONNECT time.
///
/// Guarantee and request are both set to `interval_ms`; this client does
/// not negotiate asymmetric intervals.
pub fn heart_beat_header(interval_ms: u64) -> String {
    format!("{},{}", interval_ms, interval_ms)
}

/// Parse a STOMP `heart-beat` header value (format: "cx,cy").
///
/// Values are milliseconds. Missing or invalid fields default to `0`
/// (heartbeats disabled in that direction).
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}
