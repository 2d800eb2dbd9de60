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

//! Character Device Transports
//!
//! A chardev is a bidirectional byte channel between a consumer (the
//! *frontend*, e.g. an emulated UART or a monitor console) and a host endpoint
//! (the *backend*): a TCP or Unix socket, a pseudo terminal, a serial port, a
//! named pipe, a file, an in-memory ring buffer, or a multiplexer sharing one
//! chardev between several frontends.
//!
//! - Output is non-blocking: [`Chardev::write`] returns how much the backend
//!   took, [`Chardev::write_all`] awaits readiness for the rest.
//! - Input is flow controlled: bytes are only read from the backend when the
//!   frontend's [`Frontend::can_receive`] says there is room.
//! - Lifecycle changes reach the frontend as [`ChardevEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ChardevRegistry
//!     ↓
//! Chardev (write lock, open state, frontend)
//!     ↓
//! Backend ── Socket (TLS, telnet, reconnect)
//!         ── Pty / Serial / Pipe  → ReadPump → Frontend
//!         ── File / Ringbuf / Null
//!         ── Mux → underlying Chardev
//! ```
//!
//! # Example
//!
//! ```no_run
//! use chario::{CallbackFrontend, ChardevRegistry, UNBOUNDED_CAPACITY};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> chario::Result<()> {
//!     tracing_subscriber::fmt::init();
//!     let registry = ChardevRegistry::new();
//!     let chr = registry
//!         .create_from_str("socket,id=serial0,host=127.0.0.1,port=4555,server=on,telnet=on")
//!         .await?;
//!
//!     chr.attach(Arc::new(CallbackFrontend {
//!         can_receive: Some(Box::new(|| UNBOUNDED_CAPACITY)),
//!         on_receive: Some(Box::new(|data| print!("{}", String::from_utf8_lossy(data)))),
//!         on_event: None,
//!     }))?;
//!
//!     chr.write_all(b"hello\r\n").await?;
//!     Ok(())
//! }
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
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]

mod backend;
mod channel;
mod chardev;
mod config;
mod error;
mod frontend;
mod ioctl;
mod mux;
mod registry;
mod ring;
mod socket;
mod types;
mod watch;

#[cfg(unix)]
pub use backend::PTY_PROBE_INTERVAL;
pub use chardev::Chardev;
pub(crate) use chardev::ChardevInner;
pub use config::{
    BackendOptions, ChardevOptions, DEFAULT_ESCAPE, DEFAULT_MAX_FRONTENDS, DEFAULT_RINGBUF_SIZE,
    DEFAULT_SERIAL_SPEED, DEFAULT_SLOT_CAPACITY, MuxConfig, OptionSet, SerialOptions,
    SocketAddress, SocketOptions,
};
pub use error::{ChardevError, Result};
pub use frontend::{CallbackFrontend, Frontend, UNBOUNDED_CAPACITY};
pub use ioctl::{ChardevIoctl, IoctlReply, ModemLines, Parity, SerialParams};
pub use mux::{MuxHook, MuxHooks, help_text, timestamp_prefix};
pub use registry::{ChardevInfo, ChardevRegistry};
pub use ring::RingBuffer;
pub use socket::{ConnectionState, TlsCredentials, TlsEndpoint};
pub use types::{BackendKind, ChardevEvent, WatchCondition};
pub use watch::{MAX_READ, POLL_INTERVAL, WatchHandle};
