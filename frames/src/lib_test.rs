use super::*;

fn connect_frame() -> RoutingFrame {
    let info = ServiceInfo {
        namespace: "ns1".to_owned(),
        profile: "prod".to_owned(),
        instance_id: "i1".to_owned(),
        ip: "10.0.0.1".to_owned(),
        port: 9001,
        access_key: "secret".to_owned(),
        modules: vec!["orders".to_owned(), "billing".to_owned()],
        msg: [("zone".to_owned(), "a".to_owned())].into_iter().collect(),
    };
    RoutingFrame::of(FrameType::Connect, &info)
}

#[test]
fn frame_type_numeric_mapping_matches_wire_enum() {
    assert_eq!(FrameType::Connect.as_i32(), 0);
    assert_eq!(FrameType::HealthIdle.as_i32(), 1);
    assert_eq!(FrameType::Active.as_i32(), 2);
    assert_eq!(FrameType::Disable.as_i32(), 3);
    assert_eq!(FrameType::ChangeService.as_i32(), 4);
    assert_eq!(FrameType::Error.as_i32(), 5);
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = connect_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
    assert_eq!(decoded.kind(), Some(FrameType::Connect));
}

#[test]
fn unknown_frame_type_decodes_with_payload_intact() {
    let frame = RoutingFrame::new(99, vec![0, 1, 2, 0xff]);
    let decoded = decode_frame(&encode_frame(&frame)).expect("unknown types must decode");
    assert_eq!(decoded.frame_type, 99);
    assert_eq!(decoded.payload, vec![0, 1, 2, 0xff]);
    assert_eq!(decoded.kind(), None);
}

#[test]
fn negative_frame_type_and_empty_payload_round_trip() {
    let frame = RoutingFrame::new(-7, Vec::new());
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded, frame);
}

#[test]
fn encoded_frame_starts_with_length_prefix() {
    let frame = RoutingFrame::new(FrameType::Active.as_i32(), vec![1, 2, 3]);
    let bytes = encode_frame(&frame);
    let body_len = usize::from(bytes[0]);
    assert_eq!(body_len, bytes.len() - 1);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_truncated_frame() {
    let bytes = encode_frame(&connect_frame());
    let err = decode_frame(&bytes[..bytes.len() - 3]).expect_err("truncated frame should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn payload_as_decodes_typed_message() {
    let frame = connect_frame();
    let info: ServiceInfo = frame.payload_as().expect("payload");
    assert_eq!(info.instance_id, "i1");
    assert_eq!(info.port, 9001);
    assert_eq!(info.modules, vec!["orders".to_owned(), "billing".to_owned()]);
    assert_eq!(info.msg.get("zone").map(String::as_str), Some("a"));
}

#[test]
fn payload_as_rejects_garbage_payload() {
    let frame = RoutingFrame::new(FrameType::Connect.as_i32(), vec![0x0a, 0xff, 0xff]);
    let err = frame.payload_as::<ServiceInfo>().expect_err("garbage payload");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn module_info_ops_defaults_unknown_values_to_modify() {
    let info = ModuleInfo { ops_type: 42, ..ModuleInfo::default() };
    assert_eq!(info.ops(), OpsType::Modify);

    let info = ModuleInfo { ops_type: OpsType::Delete as i32, ..ModuleInfo::default() };
    assert_eq!(info.ops(), OpsType::Delete);
}

#[test]
fn error_info_round_trips_code() {
    let frame = RoutingFrame::of(FrameType::Error, &ErrorInfo::new(ErrorCode::AccessKeyInvalid, "bad key"));
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    let info: ErrorInfo = decoded.payload_as().expect("error payload");
    assert_eq!(info.error_code(), ErrorCode::AccessKeyInvalid);
    assert_eq!(info.message, "bad key");
}

#[test]
fn error_code_serializes_as_screaming_snake_case() {
    assert_eq!(
        serde_json::to_string(&ErrorCode::AccessKeyInvalid).expect("serialize"),
        "\"ACCESS_KEY_INVALID\""
    );
    assert_eq!(serde_json::to_string(&OpsType::Delete).expect("serialize"), "\"delete\"");
}
