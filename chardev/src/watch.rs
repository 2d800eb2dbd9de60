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

//! Flow controlled input and readiness watches
//!
//! The reactor only tells us a descriptor is readable; whether the frontend
//! wants bytes is a separate, level-triggered question. [`ReadPump`] asks it
//! before every read and sizes the read to the answer. A frontend that answers
//! 0 stops the pump until it calls [`Chardev::accept_input`], a frontend is
//! attached, or [`POLL_INTERVAL`] passes, whichever comes first.

use crate::channel::SharedReader;
use crate::{Chardev, ChardevEvent, ChardevInner};
use bytes::{Bytes, BytesMut};
use chario_telnetcodec::{TelnetEvent, TelnetNegotiator};
use metrics::counter;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

/// Largest single read
pub const MAX_READ: usize = 4096;

/// How often a stalled frontend is asked again without being told to
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a pump stopped
#[derive(Debug)]
pub(crate) enum PumpExit {
    /// Zero length read
    Eof,
    /// Read failed
    Error(io::Error),
    /// The chardev went away
    Released,
}

/// Level triggered read loop feeding one chardev's frontend
pub(crate) struct ReadPump {
    chr: Weak<ChardevInner>,
    input_ready: Arc<Notify>,
    reader: SharedReader,
    telnet: Option<TelnetNegotiator>,
    pending: VecDeque<TelnetEvent>,
}

impl ReadPump {
    pub(crate) fn new(
        chr: &Chardev,
        reader: SharedReader,
        telnet: Option<TelnetNegotiator>,
    ) -> ReadPump {
        ReadPump {
            chr: chr.downgrade(),
            input_ready: chr.input_ready(),
            reader,
            telnet,
            pending: VecDeque::new(),
        }
    }

    pub(crate) async fn run(mut self) -> PumpExit {
        let mut buf = vec![0u8; MAX_READ];
        loop {
            let Some(chr) = Chardev::upgrade(&self.chr) else {
                return PumpExit::Released;
            };

            if matches!(self.pending.front(), Some(TelnetEvent::Break)) {
                self.pending.pop_front();
                chr.be_event(ChardevEvent::Break);
                continue;
            }

            let budget = chr.be_can_receive();
            if budget == 0 {
                let attached = chr.has_frontend();
                drop(chr);
                if attached {
                    tokio::select! {
                        () = self.input_ready.notified() => {}
                        () = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                } else {
                    self.input_ready.notified().await;
                }
                continue;
            }

            if let Some(TelnetEvent::Data(front)) = self.pending.front_mut() {
                let chunk = front.split_to(budget.min(front.len()));
                if front.is_empty() {
                    self.pending.pop_front();
                }
                chr.be_receive(&chunk);
                continue;
            }

            let kind = chr.kind().name();
            drop(chr);
            let want = budget.min(MAX_READ);
            let read = {
                let mut reader = self.reader.lock().await;
                reader.read(&mut buf[..want]).await
            };
            match read {
                Ok(0) => {
                    debug!("read pump reached end of stream");
                    return PumpExit::Eof;
                }
                Ok(len) => {
                    trace!(len, "read pump received");
                    counter!("chario.bytes.received", "kind" => kind).increment(len as u64);
                    self.queue(&buf[..len]);
                }
                Err(err) => return PumpExit::Error(err),
            }
        }
    }

    fn queue(&mut self, data: &[u8]) {
        match self.telnet {
            Some(ref mut telnet) => {
                let mut src = BytesMut::from(data);
                while let Ok(Some(event)) = telnet.decode(&mut src) {
                    self.pending.push_back(event);
                }
            }
            None => self
                .pending
                .push_back(TelnetEvent::Data(Bytes::copy_from_slice(data))),
        }
    }
}

/// Cancellation handle for a watch created by [`Chardev::add_watch`]
///
/// Dropping the handle leaves the watch armed.
#[derive(Debug)]
pub struct WatchHandle {
    handle: AbortHandle,
}

impl WatchHandle {
    pub(crate) fn new(handle: AbortHandle) -> Self {
        Self { handle }
    }

    /// Disarm the watch; the callback will not run
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the callback ran or the watch was cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
