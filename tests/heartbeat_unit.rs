//! Unit tests for heartbeat detection and heart-beat header handling.

use rhodium_stomp::{heart_beat_header, is_heartbeat, parse_heartbeat_header};

// =============================================================================
// is_heartbeat tests
// =============================================================================

#[test]
fn exactly_one_lf_is_heartbeat() {
    assert!(is_heartbeat(b"\n"));
}

#[test]
fn anything_else_is_not_heartbeat() {
    assert!(!is_heartbeat(b""));
    assert!(!is_heartbeat(b"\r\n"));
    assert!(!is_heartbeat(b"\n\n"));
    assert!(!is_heartbeat(b"MESSAGE\n\n\0"));
}

// =============================================================================
// heart_beat_header tests
// =============================================================================

#[test]
fn header_uses_same_value_for_both_fields() {
    assert_eq!(heart_beat_header(10_000), "10000,10000");
}

#[test]
fn zero_interval_disables_both_directions() {
    assert_eq!(heart_beat_header(0), "0,0");
}

// =============================================================================
// parse_heartbeat_header tests
// =============================================================================

#[test]
fn parse_standard_heartbeat() {
    let (cx, cy) = parse_heartbeat_header("10000,10000");
    assert_eq!(cx, 10000);
    assert_eq!(cy, 10000);
}

#[test]
fn parse_asymmetric_heartbeat() {
    let (cx, cy) = parse_heartbeat_header("5000,15000");
    assert_eq!(cx, 5000);
    assert_eq!(cy, 15000);
}

#[test]
fn parse_whitespace_padded() {
    let (cx, cy) = parse_heartbeat_header(" 10000 , 10000 ");
    assert_eq!(cx, 10000);
    assert_eq!(cy, 10000);
}

#[test]
fn parse_missing_second_value_defaults_to_zero() {
    let (cx, cy) = parse_heartbeat_header("10000");
    assert_eq!(cx, 10000);
    assert_eq!(cy, 0);
}

#[test]
fn parse_garbage_defaults_to_zero() {
    let (cx, cy) = parse_heartbeat_header("abc,def");
    assert_eq!(cx, 0);
    assert_eq!(cy, 0);
}

#[test]
fn parse_empty_defaults_to_zero() {
    let (cx, cy) = parse_heartbeat_header("");
    assert_eq!(cx, 0);
    assert_eq!(cy, 0);
}

#[test]
fn round_trip_formatted_header() {
    let (cx, cy) = parse_heartbeat_header(&heart_beat_header(250));
    assert_eq!((cx, cy), (250, 250));
}
