//! Integration tests for the low-level frame parser, independent of the
//! codec and registry layers above it.

use klipper_proto::crc::crc16_ccitt;
use klipper_proto::parser::{encode_frame, Parser, SYNC_BYTE};
use klipper_proto::Error;

#[test]
fn parses_a_zero_payload_frame() {
    let frame = encode_frame(1, 0x02, &[]);
    let parser = Parser::new();

    let (msg, consumed) = parser.parse(&frame).unwrap().unwrap();
    assert_eq!(consumed, frame.len());
    assert_eq!(msg.seq, 1);
    assert_eq!(msg.msgid, 0x02);
    assert!(msg.payload.is_empty());
}

#[test]
fn parses_queue_step_payload() {
    let payload = [
        0x00, 0x00, 0x27, 0x10, // interval = 10000
        0x00, 0x01, // count = 1
        0x00, 0x00, // add = 0
    ];
    let frame = encode_frame(2, 0x10, &payload);
    let parser = Parser::new();

    let (msg, consumed) = parser.parse(&frame).unwrap().unwrap();
    assert_eq!(consumed, frame.len());
    assert_eq!(msg.payload, &payload[..]);
}

#[test]
fn parses_with_leading_noise() {
    let frame = encode_frame(3, 0x03, &[]);
    let mut buffer = vec![0x00, 0x01, 0x02, 0x03];
    buffer.extend_from_slice(&frame);
    let parser = Parser::new();

    let (msg, consumed) = parser.parse(&buffer).unwrap().unwrap();
    assert_eq!(consumed, buffer.len());
    assert_eq!(msg.msgid, 0x03);
}

#[test]
fn parses_multiple_messages_back_to_back() {
    let frame1 = encode_frame(4, 0x02, &[]);
    let frame2 = encode_frame(5, 0x03, &[]);
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&frame1);
    buffer.extend_from_slice(&frame2);

    let parser = Parser::new();

    let (msg1, consumed1) = parser.parse(&buffer).unwrap().unwrap();
    assert_eq!(consumed1, frame1.len());
    assert_eq!(msg1.msgid, 0x02);

    let (msg2, consumed2) = parser.parse(&buffer[consumed1..]).unwrap().unwrap();
    assert_eq!(consumed2, frame2.len());
    assert_eq!(msg2.msgid, 0x03);
}

#[test]
fn incomplete_frame_returns_none() {
    let frame = encode_frame(6, 0x02, &[]);
    let parser = Parser::new();

    let result = parser.parse(&frame[..frame.len() - 1]);
    assert!(result.is_ok());
    assert!(result.unwrap().is_none());
}

#[test]
fn bad_crc_is_rejected_and_reports_a_one_byte_skip() {
    let mut frame = encode_frame(7, 0x02, &[]);
    let last = frame.len() - 1;
    frame[last] ^= 0xff;

    let parser = Parser::new();
    let result = parser.parse(&frame);
    assert!(result.is_err());
    let (err, skip) = result.unwrap_err();
    assert_eq!(err, Error::InvalidCrc);
    assert_eq!(skip, 1); // caller should drop the sync byte and retry
}

#[test]
fn no_sync_byte_discards_the_whole_buffer() {
    let buffer = vec![0x00, 0x01, 0x02, 0x03, 0x04];
    let parser = Parser::new();
    let result = parser.parse(&buffer);
    assert!(result.is_err());
    let (err, skip) = result.unwrap_err();
    assert_eq!(err, Error::InvalidSync);
    assert_eq!(skip, buffer.len());
}

#[test]
fn encode_frame_crc_matches_manual_computation() {
    let payload = [0xaa, 0xbb];
    let frame = encode_frame(9, 0x05, &payload);
    assert_eq!(frame[0], SYNC_BYTE);

    let msg_len = frame[1] as usize;
    let body = &frame[2..2 + msg_len - 2];
    let expected_crc = crc16_ccitt(&frame[1..1 + msg_len], msg_len - 2);
    let received_crc = u16::from_be_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    assert_eq!(received_crc, expected_crc);
    assert_eq!(body, &[9, 0x05, 0xaa, 0xbb]);
}
