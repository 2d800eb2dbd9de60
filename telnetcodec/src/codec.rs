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

use crate::{CodecError, TelnetEvent, TelnetFrame, TelnetOption, consts};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

///
/// `TelnetNegotiator` strips Telnet command sequences out of an inbound byte stream.
///
/// It does not track option state: every `IAC <verb> <option>` triple is consumed and dropped,
/// `IAC IAC` collapses to one literal `0xFF`, and `IAC BRK` surfaces as [`TelnetEvent::Break`].
/// Decoder state survives across calls so sequences split between reads are handled.
///
/// The encoder side produces the handful of frames a character device sends, most importantly
/// the [`bootstrap`](TelnetNegotiator::bootstrap) sequence.
///
#[derive(Debug, Default)]
pub struct TelnetNegotiator {
    state: DecoderState,
    pending: BytesMut,
    pending_break: bool,
}

impl TelnetNegotiator {
    /// Create a negotiator in the `Idle` state.
    #[must_use]
    pub fn new() -> TelnetNegotiator {
        TelnetNegotiator::default()
    }

    /// Current decoder position.
    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Forget any partially decoded command.
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.pending.clear();
        self.pending_break = false;
    }

    /// Bytes sent to a freshly connected peer before it is reported open.
    #[must_use]
    pub fn bootstrap() -> Bytes {
        Bytes::from_static(&consts::BOOTSTRAP)
    }

    /// Frames making up [`bootstrap`](TelnetNegotiator::bootstrap).
    #[must_use]
    pub fn bootstrap_frames() -> [TelnetFrame; 4] {
        [
            TelnetFrame::Will(TelnetOption::Echo),
            TelnetFrame::Will(TelnetOption::SuppressGoAhead),
            TelnetFrame::Will(TelnetOption::TransmitBinary),
            TelnetFrame::Do(TelnetOption::TransmitBinary),
        ]
    }

    fn take_pending(&mut self) -> Option<TelnetEvent> {
        if self.pending.is_empty() {
            None
        } else {
            Some(TelnetEvent::Data(self.pending.split().freeze()))
        }
    }
}

impl Decoder for TelnetNegotiator {
    type Item = TelnetEvent;
    type Error = CodecError;

    /// Consume bytes from `src`, returning the next event.
    ///
    /// Data bytes are coalesced into a single [`TelnetEvent::Data`] run until the buffer is
    /// exhausted or a break is seen. A break that follows buffered data is held back and returned
    /// by the next call so ordering is preserved.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TelnetEvent>, Self::Error> {
        if self.pending_break {
            self.pending_break = false;
            return Ok(Some(TelnetEvent::Break));
        }
        while src.has_remaining() {
            let byte = src.get_u8();
            match (self.state, byte) {
                (DecoderState::Idle, consts::IAC) => {
                    self.state = DecoderState::SawIac;
                }
                (DecoderState::Idle, _) => {
                    self.pending.put_u8(byte);
                }
                (DecoderState::SawIac, consts::IAC) => {
                    self.state = DecoderState::Idle;
                    self.pending.put_u8(consts::IAC);
                }
                (DecoderState::SawIac, consts::BRK) => {
                    self.state = DecoderState::Idle;
                    trace!("IAC BRK");
                    if let Some(data) = self.take_pending() {
                        self.pending_break = true;
                        return Ok(Some(data));
                    }
                    return Ok(Some(TelnetEvent::Break));
                }
                (DecoderState::SawIac, command) => {
                    trace!(command, "swallowing telnet command");
                    self.state = DecoderState::InOption;
                }
                (DecoderState::InOption, option) => {
                    trace!(option, "swallowing telnet option");
                    self.state = DecoderState::Idle;
                }
            }
        }
        Ok(self.take_pending())
    }
}

impl Encoder<TelnetFrame> for TelnetNegotiator {
    type Error = CodecError;

    fn encode(&mut self, item: TelnetFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        match item {
            TelnetFrame::Data(byte) => {
                if byte == consts::IAC {
                    dst.put_u8(consts::IAC);
                }
                dst.put_u8(byte);
            }
            TelnetFrame::Break => {
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::BRK);
            }
            TelnetFrame::Do(option) => encode_negotiation(consts::DO, option, dst)?,
            TelnetFrame::Dont(option) => encode_negotiation(consts::DONT, option, dst)?,
            TelnetFrame::Will(option) => encode_negotiation(consts::WILL, option, dst)?,
            TelnetFrame::Wont(option) => encode_negotiation(consts::WONT, option, dst)?,
        }
        Ok(())
    }
}

fn encode_negotiation(
    verb: u8,
    option: TelnetOption,
    dst: &mut BytesMut,
) -> Result<(), CodecError> {
    let code = option.to_u8();
    if code == consts::IAC {
        return Err(CodecError::InvalidOption(code));
    }
    dst.put_u8(consts::IAC);
    dst.put_u8(verb);
    dst.put_u8(code);
    Ok(())
}

///
/// Position of the decoder inside a command sequence.
///
/// - `Idle`: passing data through
/// - `SawIac`: the previous byte was IAC, the next decides what this is
/// - `InOption`: inside a three byte `IAC <verb> <option>` sequence, the next byte is dropped
///
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DecoderState {
    /// Normal data
    #[default]
    Idle,
    /// Received IAC, next byte is a command
    SawIac,
    /// Received IAC and a command, next byte is the option
    InOption,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut TelnetNegotiator, input: &[u8]) -> Vec<TelnetEvent> {
        let mut src = BytesMut::from(input);
        let mut events = Vec::new();
        while let Some(event) = codec.decode(&mut src).expect("decode") {
            events.push(event);
        }
        events
    }

    fn data(bytes: &[u8]) -> TelnetEvent {
        TelnetEvent::Data(Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn negotiation_is_stripped() {
        let mut codec = TelnetNegotiator::new();
        let events = decode_all(&mut codec, &[0xFF, 0xFB, 0x01, 0x61, 0x62]);
        assert_eq!(events, vec![data(b"ab")]);
        assert_eq!(codec.state(), DecoderState::Idle);
    }

    #[test]
    fn doubled_iac_is_literal() {
        let mut codec = TelnetNegotiator::new();
        let events = decode_all(&mut codec, &[0xFF, 0xFF, 0x61]);
        assert_eq!(events, vec![data(&[0xFF, 0x61])]);
    }

    #[test]
    fn break_splits_data_runs() {
        let mut codec = TelnetNegotiator::new();
        let events = decode_all(&mut codec, &[b'a', 0xFF, 0xF3, b'b']);
        assert_eq!(events, vec![data(b"a"), TelnetEvent::Break, data(b"b")]);
    }

    #[test]
    fn sequence_split_across_reads() {
        let mut codec = TelnetNegotiator::new();
        assert_eq!(decode_all(&mut codec, &[b'x', 0xFF]), vec![data(b"x")]);
        assert_eq!(codec.state(), DecoderState::SawIac);
        assert!(decode_all(&mut codec, &[0xFD]).is_empty());
        assert_eq!(codec.state(), DecoderState::InOption);
        assert_eq!(decode_all(&mut codec, &[0x00, b'y']), vec![data(b"y")]);
    }

    #[test]
    fn reset_clears_state() {
        let mut codec = TelnetNegotiator::new();
        decode_all(&mut codec, &[0xFF]);
        codec.reset();
        assert_eq!(codec.state(), DecoderState::Idle);
        assert_eq!(decode_all(&mut codec, &[0xFB]), vec![data(&[0xFB])]);
    }

    #[test]
    fn bootstrap_matches_frames() {
        let mut codec = TelnetNegotiator::new();
        let mut dst = BytesMut::new();
        for frame in TelnetNegotiator::bootstrap_frames() {
            codec.encode(frame, &mut dst).expect("encode");
        }
        assert_eq!(&dst[..], &TelnetNegotiator::bootstrap()[..]);
        assert_eq!(
            &dst[..],
            &[0xFF, 0xFB, 0x01, 0xFF, 0xFB, 0x03, 0xFF, 0xFB, 0x00, 0xFF, 0xFD, 0x00]
        );
    }

    #[test]
    fn encode_rejects_iac_option() {
        let mut codec = TelnetNegotiator::new();
        let mut dst = BytesMut::new();
        let err = codec
            .encode(TelnetFrame::Will(TelnetOption::Unknown(0xFF)), &mut dst)
            .unwrap_err();
        assert_eq!(err, CodecError::InvalidOption(0xFF));
        assert!(dst.is_empty());
    }
}
