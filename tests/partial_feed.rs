//! Tests for FrameSplitter behavior when bytes arrive in arbitrary chunks:
//! the splitter must only emit complete messages and leave partial input
//! untouched.

use bytes::BytesMut;
use rhodium_stomp::FrameSplitter;
use tokio_util::codec::Decoder;

#[test]
fn empty_buffer_yields_nothing() {
    let mut splitter = FrameSplitter::new();
    let mut buf = BytesMut::new();
    assert!(splitter.decode(&mut buf).expect("decode failed").is_none());
}

#[test]
fn partial_frame_yields_nothing_and_keeps_bytes() {
    let mut splitter = FrameSplitter::new();
    let mut buf = BytesMut::from(&b"SEND\ndestination:/queue/a\n\nhel"[..]);
    assert!(splitter.decode(&mut buf).expect("decode failed").is_none());
    assert_eq!(buf.len(), 30);
}

#[test]
fn frame_completes_once_nul_arrives() {
    let mut splitter = FrameSplitter::new();
    let mut buf = BytesMut::from(&b"SEND\n\nhel"[..]);
    assert!(splitter.decode(&mut buf).expect("decode failed").is_none());

    buf.extend_from_slice(b"lo\0");
    let msg = splitter
        .decode(&mut buf)
        .expect("decode failed")
        .expect("no message");
    assert_eq!(&msg[..], b"SEND\n\nhello\0");
    assert!(buf.is_empty());
}

#[test]
fn heartbeat_is_cut_as_single_byte() {
    let mut splitter = FrameSplitter::new();
    let mut buf = BytesMut::from(&b"\nSEND\n\n\0"[..]);

    let hb = splitter
        .decode(&mut buf)
        .expect("decode failed")
        .expect("no message");
    assert_eq!(&hb[..], b"\n");

    let frame = splitter
        .decode(&mut buf)
        .expect("decode failed")
        .expect("no message");
    assert_eq!(&frame[..], b"SEND\n\n\0");
}

#[test]
fn consecutive_heartbeats_are_separate_messages() {
    let mut splitter = FrameSplitter::new();
    let mut buf = BytesMut::from(&b"\n\n\n"[..]);
    for _ in 0..3 {
        let msg = splitter
            .decode(&mut buf)
            .expect("decode failed")
            .expect("no message");
        assert_eq!(&msg[..], b"\n");
    }
    assert!(buf.is_empty());
}

#[test]
fn back_to_back_frames_split_cleanly() {
    let mut splitter = FrameSplitter::new();
    let mut buf = BytesMut::from(&b"CONNECTED\nversion:1.2\n\n\0MESSAGE\nmessage-id:1\n\nbody\0"[..]);

    let first = splitter
        .decode(&mut buf)
        .expect("decode failed")
        .expect("no message");
    assert_eq!(&first[..], b"CONNECTED\nversion:1.2\n\n\0");

    let second = splitter
        .decode(&mut buf)
        .expect("decode failed")
        .expect("no message");
    assert_eq!(&second[..], b"MESSAGE\nmessage-id:1\n\nbody\0");
    assert!(buf.is_empty());
}

#[test]
fn byte_at_a_time_feed_produces_one_message() {
    let wire = b"MESSAGE\nsubscription:sub-0\n\npayload\0";
    let mut splitter = FrameSplitter::new();
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    for &b in wire.iter() {
        buf.extend_from_slice(&[b]);
        while let Some(msg) = splitter.decode(&mut buf).expect("decode failed") {
            out.push(msg);
        }
    }
    assert_eq!(out.len(), 1);
    assert_eq!(&out[0][..], &wire[..]);
}
