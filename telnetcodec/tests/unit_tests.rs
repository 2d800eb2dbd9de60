//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Unit tests for the telnet negotiator

use bytes::{Bytes, BytesMut};
use chario_telnetcodec::{TelnetEvent, TelnetFrame, TelnetNegotiator, TelnetOption, consts};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use futures::StreamExt;

// ============================================================================
// Helper Functions
// ============================================================================

fn decode_all(codec: &mut TelnetNegotiator, buffer: &mut BytesMut) -> Vec<TelnetEvent> {
    let mut events = Vec::new();
    while let Some(event) = codec.decode(buffer).unwrap() {
        events.push(event);
    }
    events
}

fn payload(events: &[TelnetEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            TelnetEvent::Data(bytes) => Some(bytes.to_vec()),
            TelnetEvent::Break => None,
        })
        .flatten()
        .collect()
}

// ============================================================================
// TelnetOption Tests
// ============================================================================

#[test]
fn telnet_option_from_u8() {
    assert_eq!(TelnetOption::from(0), TelnetOption::TransmitBinary);
    assert_eq!(TelnetOption::from(1), TelnetOption::Echo);
    assert_eq!(TelnetOption::from(3), TelnetOption::SuppressGoAhead);
    assert_eq!(TelnetOption::from(24), TelnetOption::Unknown(24));
}

#[test]
fn telnet_option_to_u8() {
    assert_eq!(u8::from(TelnetOption::TransmitBinary), 0);
    assert_eq!(u8::from(TelnetOption::Echo), 1);
    assert_eq!(u8::from(TelnetOption::SuppressGoAhead), 3);
    assert_eq!(u8::from(TelnetOption::Unknown(31)), 31);
}

// ============================================================================
// Decoder Tests
// ============================================================================

#[test]
fn will_echo_before_data_is_hidden() {
    let mut codec = TelnetNegotiator::new();
    let mut buffer = BytesMut::from(&[0xFF, 0xFB, 0x01, 0x61, 0x62][..]);
    let events = decode_all(&mut codec, &mut buffer);
    assert_eq!(events, vec![TelnetEvent::Data(Bytes::from_static(b"ab"))]);
}

#[test]
fn escaped_iac_passes_once() {
    let mut codec = TelnetNegotiator::new();
    let mut buffer = BytesMut::from(&[0xFF, 0xFF, 0x61][..]);
    assert_eq!(payload(&decode_all(&mut codec, &mut buffer)), vec![0xFF, 0x61]);
}

#[test]
fn peer_bootstrap_is_fully_consumed() {
    let mut codec = TelnetNegotiator::new();
    let mut buffer = BytesMut::from(&consts::BOOTSTRAP[..]);
    assert!(decode_all(&mut codec, &mut buffer).is_empty());
}

#[test]
fn break_only() {
    let mut codec = TelnetNegotiator::new();
    let mut buffer = BytesMut::from(&[consts::IAC, consts::BRK][..]);
    assert_eq!(decode_all(&mut codec, &mut buffer), vec![TelnetEvent::Break]);
}

#[test]
fn byte_at_a_time_matches_bulk() {
    let input = b"he\xFF\xFD\x03llo\xFF\xFF!\xFF\xF3x";
    let mut bulk = TelnetNegotiator::new();
    let bulk_events = decode_all(&mut bulk, &mut BytesMut::from(&input[..]));

    let mut trickle = TelnetNegotiator::new();
    let mut trickle_events = Vec::new();
    for byte in input {
        trickle_events.extend(decode_all(&mut trickle, &mut BytesMut::from(&[*byte][..])));
    }
    assert_eq!(payload(&bulk_events), payload(&trickle_events));
    assert_eq!(payload(&bulk_events), b"hello\xFF!x".to_vec());
    let breaks = trickle_events
        .iter()
        .filter(|event| **event == TelnetEvent::Break)
        .count();
    assert_eq!(breaks, 1);
}

#[tokio::test]
async fn framed_read_over_stream() {
    let reader = &b"\xFF\xFB\x01ab\xFF\xF3c"[..];
    let mut framed = FramedRead::new(reader, TelnetNegotiator::new());
    let mut events = Vec::new();
    while let Some(event) = framed.next().await {
        events.push(event.unwrap());
    }
    assert_eq!(
        events,
        vec![
            TelnetEvent::Data(Bytes::from_static(b"ab")),
            TelnetEvent::Break,
            TelnetEvent::Data(Bytes::from_static(b"c")),
        ]
    );
}

// ============================================================================
// Encoder Tests
// ============================================================================

#[test]
fn encode_data_escapes_iac() {
    let mut codec = TelnetNegotiator::new();
    let mut buffer = BytesMut::new();
    codec.encode(TelnetFrame::Data(0xFF), &mut buffer).unwrap();
    codec.encode(TelnetFrame::Data(b'a'), &mut buffer).unwrap();
    assert_eq!(&buffer[..], &[0xFF, 0xFF, b'a']);
}

#[test]
fn encode_negotiation_verbs() {
    let mut codec = TelnetNegotiator::new();
    let mut buffer = BytesMut::new();
    codec.encode(TelnetFrame::Dont(TelnetOption::Echo), &mut buffer).unwrap();
    codec.encode(TelnetFrame::Wont(TelnetOption::Echo), &mut buffer).unwrap();
    codec.encode(TelnetFrame::Break, &mut buffer).unwrap();
    assert_eq!(&buffer[..], &[0xFF, 0xFE, 0x01, 0xFF, 0xFC, 0x01, 0xFF, 0xF3]);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn stream_without_iac_is_identity(input in proptest::collection::vec(0u8..0xFF, 0..512)) {
        let mut codec = TelnetNegotiator::new();
        let events = decode_all(&mut codec, &mut BytesMut::from(&input[..]));
        prop_assert_eq!(payload(&events), input);
    }

    #[test]
    fn escaped_payload_decodes_to_original(input in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut codec = TelnetNegotiator::new();
        let mut wire = BytesMut::new();
        for byte in &input {
            codec.encode(TelnetFrame::Data(*byte), &mut wire).unwrap();
        }
        let events = decode_all(&mut codec, &mut wire);
        prop_assert_eq!(payload(&events), input);
    }
}
