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

//! Multiplexer: several frontends sharing one chardev
//!
//! Input goes to the focused frontend only. A single escape byte (Ctrl-A by
//! default) introduces a command:
//!
//! | Key        | Action                                   |
//! |------------|------------------------------------------|
//! | `h` or `?` | print help                               |
//! | `x`        | print `chario: Terminated`, run exit hook |
//! | `s`        | run flush hook                           |
//! | `t`        | toggle output timestamps                 |
//! | `b`        | send a break to the focused frontend     |
//! | `c`        | focus the next frontend                  |
//! | escape     | send one literal escape byte             |
//!
//! Each frontend owns a small ring buffer for input it could not take yet.
//! The buffer keeps the newest bytes: on overflow the oldest are dropped.

use crate::ring::RingBuffer;
use crate::{Chardev, ChardevError, ChardevEvent, ChardevInner, Frontend, MuxConfig, Result};
use metrics::counter;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// Callback run by a mux command
pub type MuxHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Actions behind the `x` and `s` commands
#[derive(Clone, Default)]
pub struct MuxHooks {
    /// Run after `chario: Terminated` is written; exits the process when unset
    pub exit: Option<MuxHook>,
    /// Run on `s`; does nothing when unset
    pub flush: Option<MuxHook>,
}

impl MuxHooks {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the exit action
    pub fn with_exit<F: Fn() + Send + Sync + 'static>(mut self, exit: F) -> Self {
        self.exit = Some(Arc::new(exit));
        self
    }

    /// Set the flush action
    pub fn with_flush<F: Fn() + Send + Sync + 'static>(mut self, flush: F) -> Self {
        self.flush = Some(Arc::new(flush));
        self
    }
}

impl fmt::Debug for MuxHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxHooks")
            .field("exit", &self.exit.is_some())
            .field("flush", &self.flush.is_some())
            .finish()
    }
}

const HELP: [&str; 7] = [
    "% h    print this help\n\r",
    "% x    exit\n\r",
    "% s    flush\n\r",
    "% t    toggle console timestamps\n\r",
    "% b    send break\n\r",
    "% c    switch between frontends\n\r",
    "% %  sends %\n\r",
];

/// Help text for `escape`, as written by the `h` command
pub fn help_text(escape: u8) -> String {
    let (name, mut text) = if escape > 0 && escape < 26 {
        (format!("C-{}", char::from(b'a' + escape - 1)), String::from("\n\r"))
    } else {
        (
            String::from("Escape-Char"),
            format!("\n\rEscape-Char set to Ascii: 0x{escape:02x}\n\r\n\r"),
        )
    };
    for line in HELP {
        text.push_str(&line.replace('%', &name));
    }
    text
}

/// `[HH:MM:SS.mmm] ` for `elapsed_ms` since timestamps were switched on
pub fn timestamp_prefix(elapsed_ms: u128) -> String {
    let secs = elapsed_ms / 1000;
    format!(
        "[{:02}:{:02}:{:02}.{:03}] ",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        elapsed_ms % 1000
    )
}

struct MuxSlot {
    frontend: Arc<dyn Frontend>,
    buffer: RingBuffer,
}

#[derive(Default)]
struct MuxState {
    slots: Vec<MuxSlot>,
    focus: Option<usize>,
    got_escape: bool,
    timestamps: bool,
    linestart: bool,
    timestamp_start: Option<Instant>,
    /// Prefix bytes the underlying chardev has not taken yet
    prefix: Vec<u8>,
}

/// What one inbound batch asks for, executed after the state lock is released
enum MuxAction {
    Data(Vec<u8>),
    Help,
    Exit,
    Flush,
    Break,
    Cycle,
}

pub(crate) struct MuxBackend {
    underlying: Chardev,
    config: MuxConfig,
    hooks: MuxHooks,
    owns_underlying: bool,
    dispatch_installed: AtomicBool,
    state: Mutex<MuxState>,
}

impl MuxBackend {
    pub(crate) fn new(
        underlying: Chardev,
        config: MuxConfig,
        hooks: MuxHooks,
        owns_underlying: bool,
    ) -> Self {
        Self {
            underlying,
            config,
            hooks,
            owns_underlying,
            dispatch_installed: AtomicBool::new(false),
            state: Mutex::new(MuxState::default()),
        }
    }

    pub(crate) fn underlying(&self) -> &Chardev {
        &self.underlying
    }

    pub(crate) fn filename(&self) -> String {
        format!("mux:{}", self.underlying.label())
    }

    pub(crate) fn frontend_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub(crate) fn focus(&self) -> Option<usize> {
        self.state.lock().focus
    }

    pub(crate) fn timestamps(&self) -> bool {
        self.state.lock().timestamps
    }

    /// Add a frontend and give it focus
    pub(crate) fn attach(&self, chr: &Chardev, frontend: Arc<dyn Frontend>) -> Result<usize> {
        if !self.dispatch_installed.swap(true, Ordering::AcqRel) {
            let dispatch = Arc::new(MuxDispatch {
                mux: chr.downgrade(),
            });
            if let Err(err) = self.underlying.attach(dispatch) {
                self.dispatch_installed.store(false, Ordering::Release);
                return Err(err);
            }
        }

        let (index, previous) = {
            let mut state = self.state.lock();
            if state.slots.len() >= self.config.max_frontends {
                error!(
                    label = %chr.label(),
                    max = self.config.max_frontends,
                    "too many uses of multiplexed chardev '{}'",
                    chr.label()
                );
                return Err(ChardevError::MuxFull(self.config.max_frontends));
            }
            state.slots.push(MuxSlot {
                frontend: frontend.clone(),
                buffer: RingBuffer::new(self.config.slot_capacity)?,
            });
            let index = state.slots.len() - 1;
            let previous = state
                .focus
                .replace(index)
                .map(|old| state.slots[old].frontend.clone());
            (index, previous)
        };
        debug!(label = %chr.label(), index, "mux frontend attached");

        if let Some(previous) = previous {
            previous.event(ChardevEvent::MuxOut);
        }
        frontend.event(ChardevEvent::MuxIn);
        if self.underlying.is_open() {
            frontend.event(ChardevEvent::Opened);
        }
        Ok(index)
    }

    /// Drop every frontend and unhook from the underlying chardev
    pub(crate) fn detach_all(&self) {
        self.clear_slots();
        self.unhook();
    }

    pub(crate) fn clear_slots(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.focus = None;
        state.got_escape = false;
    }

    fn unhook(&self) {
        if self.dispatch_installed.swap(false, Ordering::AcqRel) {
            self.underlying.detach();
        }
    }

    /// Move focus to the next frontend, wrapping around
    pub(crate) fn cycle_focus(&self) {
        let switch = {
            let mut state = self.state.lock();
            match state.focus {
                Some(old) if !state.slots.is_empty() => {
                    let new = (old + 1) % state.slots.len();
                    state.focus = Some(new);
                    Some((
                        state.slots[old].frontend.clone(),
                        state.slots[new].frontend.clone(),
                    ))
                }
                _ => None,
            }
        };
        if let Some((old, new)) = switch {
            old.event(ChardevEvent::MuxOut);
            new.event(ChardevEvent::MuxIn);
        }
    }

    fn focused(&self) -> Option<(usize, Arc<dyn Frontend>)> {
        let state = self.state.lock();
        let index = state.focus?;
        Some((index, state.slots[index].frontend.clone()))
    }

    /// Feed buffered input to the focused frontend while it has room
    pub(crate) fn accept_input(&self) {
        let Some((index, frontend)) = self.focused() else {
            return;
        };
        loop {
            let room = frontend.can_receive();
            if room == 0 {
                return;
            }
            let bytes = {
                let mut state = self.state.lock();
                match state.slots.get_mut(index) {
                    Some(slot) => slot.buffer.read(room),
                    None => return,
                }
            };
            if bytes.is_empty() {
                return;
            }
            frontend.receive(&bytes);
        }
    }

    fn can_receive(&self) -> usize {
        let Some((index, frontend)) = self.focused() else {
            return 0;
        };
        let (room, empty) = {
            let state = self.state.lock();
            state.slots.get(index).map_or((0, false), |slot| {
                (slot.buffer.capacity() - slot.buffer.len(), slot.buffer.is_empty())
            })
        };
        match (room, empty) {
            (room, true) => room.saturating_add(frontend.can_receive()),
            (0, false) => frontend.can_receive(),
            (room, false) => room,
        }
    }

    /// Run escape processing over inbound bytes
    fn receive(&self, chr: &Chardev, data: &[u8]) {
        self.accept_input();

        let actions = {
            let mut state = self.state.lock();
            let escape = self.config.escape;
            let mut actions = Vec::new();
            let mut run = Vec::new();
            for &byte in data {
                let action = if state.got_escape {
                    state.got_escape = false;
                    match byte {
                        b if b == escape => None,
                        b'h' | b'?' => Some(MuxAction::Help),
                        b'x' => Some(MuxAction::Exit),
                        b's' => Some(MuxAction::Flush),
                        b'b' => Some(MuxAction::Break),
                        b'c' => Some(MuxAction::Cycle),
                        b't' => {
                            state.timestamps = !state.timestamps;
                            state.timestamp_start = None;
                            state.linestart = false;
                            state.prefix.clear();
                            continue;
                        }
                        _ => continue,
                    }
                } else if byte == escape {
                    state.got_escape = true;
                    continue;
                } else {
                    None
                };
                match action {
                    None => run.push(byte),
                    Some(action) => {
                        if !run.is_empty() {
                            actions.push(MuxAction::Data(std::mem::take(&mut run)));
                        }
                        actions.push(action);
                    }
                }
            }
            if !run.is_empty() {
                actions.push(MuxAction::Data(run));
            }
            actions
        };

        for action in actions {
            match action {
                MuxAction::Data(bytes) => self.deliver(&bytes),
                MuxAction::Help => {
                    let text = help_text(self.config.escape);
                    let writer = chr.clone();
                    chr.spawn(async move {
                        if let Err(err) = writer.write_all(text.as_bytes()).await {
                            debug!(label = %writer.label(), error = %err, "help text not written");
                        }
                    });
                }
                MuxAction::Exit => {
                    let writer = chr.clone();
                    let exit = self.hooks.exit.clone();
                    chr.spawn(async move {
                        let _ = writer.write_all(b"chario: Terminated\n\r").await;
                        match exit {
                            Some(exit) => exit(),
                            None => std::process::exit(0),
                        }
                    });
                }
                MuxAction::Flush => {
                    if let Some(ref flush) = self.hooks.flush {
                        flush();
                    }
                }
                MuxAction::Break => {
                    if let Some((_, frontend)) = self.focused() {
                        frontend.event(ChardevEvent::Break);
                    }
                }
                MuxAction::Cycle => self.cycle_focus(),
            }
        }
    }

    /// Hand data to the focused frontend, buffering what it cannot take
    fn deliver(&self, data: &[u8]) {
        let Some((index, frontend)) = self.focused() else {
            trace!(len = data.len(), "mux input dropped, no frontend");
            return;
        };
        let buffered = {
            let state = self.state.lock();
            state.slots.get(index).is_some_and(|slot| !slot.buffer.is_empty())
        };
        let mut offset = 0;
        if !buffered {
            let take = frontend.can_receive().min(data.len());
            if take > 0 {
                frontend.receive(&data[..take]);
                offset = take;
            }
        }
        if offset < data.len() {
            let mut state = self.state.lock();
            if let Some(slot) = state.slots.get_mut(index) {
                let evicted = slot.buffer.write(&data[offset..]);
                if evicted > 0 {
                    counter!("chario.mux.evicted").increment(evicted as u64);
                    warn!(index, evicted, "mux input buffer overflow");
                }
            }
        }
    }

    /// Forward an underlying event to every frontend
    pub(crate) fn broadcast(&self, event: ChardevEvent) {
        let frontends: Vec<Arc<dyn Frontend>> = self
            .state
            .lock()
            .slots
            .iter()
            .map(|slot| slot.frontend.clone())
            .collect();
        for frontend in frontends {
            frontend.event(event);
        }
    }

    /// Called with the mux write lock held
    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.timestamps {
            drop(state);
            return self.underlying.write(buf);
        }
        let mut written = 0;
        for line in buf.split_inclusive(|&byte| byte == b'\n') {
            if state.linestart {
                let start = *state.timestamp_start.get_or_insert_with(Instant::now);
                state.prefix = timestamp_prefix(start.elapsed().as_millis()).into_bytes();
                state.linestart = false;
            }
            if !state.prefix.is_empty() {
                let taken = self.underlying.write(&state.prefix)?;
                state.prefix.drain(..taken);
                if !state.prefix.is_empty() {
                    break;
                }
            }
            let taken = self.underlying.write(line)?;
            written += taken;
            if taken < line.len() {
                break;
            }
            if line.ends_with(b"\n") {
                state.linestart = true;
            }
        }
        Ok(written)
    }

    /// Release the underlying chardev; the slots stay so `Closed` can still
    /// reach every frontend
    pub(crate) fn close(&self) {
        self.unhook();
        if self.owns_underlying {
            self.underlying.close();
        }
    }
}

/// Frontend installed on the underlying chardev, routing into the mux
struct MuxDispatch {
    mux: Weak<ChardevInner>,
}

impl MuxDispatch {
    fn with_mux<R>(&self, default: R, f: impl FnOnce(&Chardev, &MuxBackend) -> R) -> R {
        let Some(chr) = Chardev::upgrade(&self.mux) else {
            return default;
        };
        match *chr.backend() {
            crate::backend::Backend::Mux(ref mux) => f(&chr, mux),
            _ => default,
        }
    }
}

impl Frontend for MuxDispatch {
    fn can_receive(&self) -> usize {
        self.with_mux(0, |_, mux| mux.can_receive())
    }

    fn receive(&self, data: &[u8]) {
        self.with_mux((), |chr, mux| mux.receive(chr, data));
    }

    fn event(&self, event: ChardevEvent) {
        self.with_mux((), |chr, _| chr.be_event(event));
    }
}
