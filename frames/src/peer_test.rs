use super::*;

#[test]
fn reply_keeps_correlation_id_and_command() {
    let req = PeerFrame::new(17, 300, PeerKind::Request, b"ping".to_vec());
    let resp = req.reply(PeerKind::Response, b"pong".to_vec());

    assert_eq!(resp.id, 17);
    assert_eq!(resp.command, 300);
    assert_eq!(resp.peer_kind(), Some(PeerKind::Response));
    assert_eq!(resp.payload, b"pong".to_vec());
}

#[test]
fn terminal_kinds() {
    assert!(PeerKind::Response.is_terminal());
    assert!(PeerKind::StreamEnd.is_terminal());
    assert!(PeerKind::Error.is_terminal());
    assert!(!PeerKind::Request.is_terminal());
    assert!(!PeerKind::StreamItem.is_terminal());
    assert!(!PeerKind::Forget.is_terminal());
}

#[test]
fn peer_frame_round_trip() {
    let mut frame = PeerFrame::new(u64::MAX, -1, PeerKind::Error, vec![9; 64]);
    frame.code = 404;
    let decoded = decode_peer(&encode_peer(&frame)).expect("decode");
    assert_eq!(decoded, frame);
}

#[test]
fn unknown_peer_kind_is_none() {
    let frame = PeerFrame { kind: 77, ..PeerFrame::default() };
    assert_eq!(frame.peer_kind(), None);
}

#[test]
fn decode_peer_rejects_malformed_bytes() {
    assert!(decode_peer(&[0x05, 0x08]).is_err());
}
