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

//! # Chario Telnet Negotiator
//!
//! A deliberately small Telnet (RFC 854) codec for character devices exposed over TCP. A
//! character device does not hold a conversation with its peer; it only needs to
//!
//! - put the peer's terminal into character-at-a-time binary mode when the connection opens,
//! - strip whatever option negotiation the peer sends back out of the data stream,
//! - collapse escaped `IAC IAC` pairs into a literal `0xFF`,
//! - notice `IAC BRK` so it can be forwarded as a break condition.
//!
//! ## Core Components
//!
//! ### [`TelnetNegotiator`]
//!
//! Implements [`Decoder`](tokio_util::codec::Decoder) producing [`TelnetEvent`]s and
//! [`Encoder<TelnetFrame>`](tokio_util::codec::Encoder). The decoder is a three state machine
//! ([`DecoderState`]) that survives across reads.
//!
//! ### Bootstrap
//!
//! [`TelnetNegotiator::bootstrap`] returns the twelve bytes sent to each new peer:
//!
//! | Bytes      | Meaning            |
//! |------------|--------------------|
//! | `FF FB 01` | WILL ECHO          |
//! | `FF FB 03` | WILL SUPPRESS-GA   |
//! | `FF FB 00` | WILL BINARY        |
//! | `FF FD 00` | DO BINARY          |
//!
//! ## Usage Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use chario_telnetcodec::{TelnetEvent, TelnetNegotiator};
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = TelnetNegotiator::new();
//! let mut input = BytesMut::from(&b"\xFF\xFB\x01ab"[..]);
//! let event = codec.decode(&mut input).unwrap();
//! assert_eq!(event, Some(TelnetEvent::Data(bytes::Bytes::from_static(b"ab"))));
//! ```

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod codec;
pub mod consts;
mod event;
mod frame;
mod options;
mod result;

pub use self::codec::{DecoderState, TelnetNegotiator};
pub use self::event::TelnetEvent;
pub use self::frame::TelnetFrame;
pub use self::options::TelnetOption;
pub use self::result::{CodecError, CodecResult};
