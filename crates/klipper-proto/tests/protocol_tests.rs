//! Integration tests exercising the codec, registry and CRC layers together,
//! the way a host and MCU would actually use them over a connection.

use bytes::BytesMut;
use klipper_proto::codec::{KlipperCodec, OutgoingFrame};
use klipper_proto::commands::build_core_registry;
use klipper_proto::crc::crc32;
use tokio_util::codec::{Decoder, Encoder};

/// A `queue_step` command, built through the registry, round-trips through
/// the wire codec and decodes back to the same parameter values.
#[test]
fn queue_step_roundtrips_through_codec_and_registry() {
    let registry = build_core_registry();
    let fmt = registry.lookup_command("queue_step").unwrap();
    let payload = fmt
        .encode_text("queue_step oid=2 interval=10000 count=1 add=0")
        .unwrap();

    let mut codec = KlipperCodec::new();
    let mut buffer = BytesMut::new();
    codec
        .encode(
            OutgoingFrame { seq: 1, msgid: payload[0], payload: payload[1..].to_vec() },
            &mut buffer,
        )
        .unwrap();

    let decoded = codec.decode(&mut buffer).unwrap().unwrap();
    assert_eq!(decoded.msgid, fmt.msgid);

    let params = fmt.decode(&decoded.payload).unwrap();
    assert_eq!(params.get_i64("oid"), Some(2));
    assert_eq!(params.get_i64("interval"), Some(10000));
    assert_eq!(params.get_i64("count"), Some(1));
    assert_eq!(params.get_i64("add"), Some(0));
}

/// A `shutdown` response's text field survives encode/decode unchanged.
#[test]
fn shutdown_response_text_roundtrips() {
    let registry = build_core_registry();
    let shutdown = registry.lookup_command("shutdown").unwrap();

    let encoded = shutdown
        .encode(&[klipper_proto::registry::ParamValue::Str("Rescan failed".into())])
        .unwrap();
    let params = shutdown.decode(&encoded[1..]).unwrap();
    assert_eq!(params.get_str("reason"), Some("Rescan failed"));
}

/// The config-negotiation CRC32 is computed over the text of the sorted,
/// newline-joined command list — not the binary payloads — and is
/// deterministic for a given set of commands.
#[test]
fn config_crc_is_stable_for_a_fixed_command_set() {
    let commands = [
        "config_stepper oid=0 step_pin=5 dir_pin=6 min_stop_interval=200 invert_step=0",
        "config_end_stop oid=1 pin=7 pull_up=1 stepper_oid=0",
        "finalize_config crc=0",
    ];
    let joined = commands.join("\n");
    let crc_a = crc32(joined.as_bytes());
    let crc_b = crc32(joined.as_bytes());
    assert_eq!(crc_a, crc_b);

    let mut shuffled = commands.to_vec();
    shuffled.swap(0, 1);
    let crc_c = crc32(shuffled.join("\n").as_bytes());
    assert_ne!(crc_a, crc_c, "reordering the config list must change its checksum");
}

/// Noise before a valid frame is skipped and the frame behind it still
/// decodes, the way a freshly-opened serial port with garbage in its
/// buffer would behave.
#[test]
fn decode_stream_with_leading_noise() {
    let mut codec = KlipperCodec::new();
    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    codec
        .encode(OutgoingFrame { seq: 0, msgid: 0x12, payload: vec![] }, &mut buffer)
        .unwrap();

    let decoded = codec.decode(&mut buffer).unwrap().unwrap();
    assert_eq!(decoded.msgid, 0x12);
}

#[test]
fn decode_incomplete_frame_returns_none() {
    let mut codec = KlipperCodec::new();
    let mut buffer = BytesMut::new();
    codec
        .encode(OutgoingFrame { seq: 0, msgid: 0x12, payload: vec![1, 2, 3] }, &mut buffer)
        .unwrap();
    buffer.truncate(buffer.len() - 2);

    let result = codec.decode(&mut buffer).unwrap();
    assert!(result.is_none());
}
