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

//! Core types shared by every backend

use std::fmt;

/// Lifecycle events delivered to a frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChardevEvent {
    /// The backend is ready for I/O
    Opened,
    /// The backend lost its peer or was closed
    Closed,
    /// Serial break condition
    Break,
    /// Mux focus moved to this frontend
    MuxIn,
    /// Mux focus moved away from this frontend
    MuxOut,
}

impl fmt::Display for ChardevEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Closed => write!(f, "closed"),
            Self::Break => write!(f, "break"),
            Self::MuxIn => write!(f, "mux-in"),
            Self::MuxOut => write!(f, "mux-out"),
        }
    }
}

/// Readiness a watch waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchCondition {
    /// Backend can accept more output
    Out,
    /// Backend has lost its peer
    Hup,
}

/// Backend kinds
///
/// The set is closed; [`BackendKind::ALL`] is the registration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Discards output, never produces input
    Null,
    /// In-memory ring buffer
    Ringbuf,
    /// Output file
    File,
    /// Named pipe
    Pipe,
    /// Pseudo terminal
    Pty,
    /// Host serial tty
    Serial,
    /// TCP or Unix socket
    Socket,
    /// Multiplexer over another chardev
    Mux,
}

impl BackendKind {
    /// Every kind that can be created from options, in lookup order
    pub const ALL: [BackendKind; 7] = [
        BackendKind::Null,
        BackendKind::Ringbuf,
        BackendKind::File,
        BackendKind::Pipe,
        BackendKind::Pty,
        BackendKind::Serial,
        BackendKind::Socket,
    ];

    /// Option-level name of the kind
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Ringbuf => "ringbuf",
            Self::File => "file",
            Self::Pipe => "pipe",
            Self::Pty => "pty",
            Self::Serial => "serial",
            Self::Socket => "socket",
            Self::Mux => "mux",
        }
    }

    /// Look a kind up by name. `memory` is accepted as an alias of `ringbuf`,
    /// `tty` of `serial`.
    pub fn from_name(name: &str) -> Option<BackendKind> {
        match name {
            "memory" => Some(Self::Ringbuf),
            "tty" => Some(Self::Serial),
            _ => Self::ALL.into_iter().find(|kind| kind.name() == name),
        }
    }

    /// Whether the backend reports `Opened` itself once its peer is ready,
    /// rather than being open from construction
    pub fn explicit_open(self) -> bool {
        matches!(self, Self::Socket | Self::Pty)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
