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

//! Backend dispatch
//!
//! Every transport is one variant of [`Backend`]. The set is closed: adding a
//! transport means adding a variant and its arms here, nothing is registered
//! at runtime.

#[cfg(unix)]
pub(crate) mod fd;
mod file;
#[cfg(unix)]
mod pipe;
#[cfg(unix)]
mod pty;
mod ringbuf;
#[cfg(unix)]
mod serial;
#[cfg(unix)]
mod tty;

pub(crate) use self::file::FileBackend;
#[cfg(unix)]
pub(crate) use self::pipe::PipeBackend;
#[cfg(unix)]
pub use self::pty::PTY_PROBE_INTERVAL;
#[cfg(unix)]
pub(crate) use self::pty::PtyBackend;
pub(crate) use self::ringbuf::RingbufBackend;
#[cfg(unix)]
pub(crate) use self::serial::SerialBackend;

use crate::chardev::BackendContext;
use crate::ioctl::{ChardevIoctl, IoctlReply};
use crate::mux::MuxBackend;
use crate::socket::{SocketBackend, TlsCredentials};
use crate::{BackendKind, BackendOptions, Chardev, ChardevError, Result};
use std::sync::Arc;

pub(crate) enum Backend {
    Null,
    Ringbuf(RingbufBackend),
    File(FileBackend),
    #[cfg(unix)]
    Pipe(PipeBackend),
    #[cfg(unix)]
    Pty(PtyBackend),
    #[cfg(unix)]
    Serial(SerialBackend),
    Socket(SocketBackend),
    Mux(MuxBackend),
}

impl Backend {
    /// Acquire the backend's resources; nothing runs until [`Backend::start`]
    pub(crate) fn create(
        context: &BackendContext,
        options: &BackendOptions,
        tls: Option<Arc<TlsCredentials>>,
    ) -> Result<Backend> {
        Ok(match options {
            BackendOptions::Null => Backend::Null,
            BackendOptions::Ringbuf { size } => Backend::Ringbuf(RingbufBackend::new(*size)?),
            BackendOptions::File { path, append } => {
                Backend::File(FileBackend::open(path, *append)?)
            }
            #[cfg(unix)]
            BackendOptions::Pipe { path } => Backend::Pipe(PipeBackend::open(context, path)?),
            #[cfg(unix)]
            BackendOptions::Pty => Backend::Pty(PtyBackend::open(context)?),
            #[cfg(unix)]
            BackendOptions::Serial(serial) => {
                Backend::Serial(SerialBackend::open(context, serial)?)
            }
            #[cfg(not(unix))]
            BackendOptions::Pipe { .. } | BackendOptions::Pty | BackendOptions::Serial(_) => {
                return Err(ChardevError::NotSupported {
                    kind: options.kind(),
                    operation: "open",
                });
            }
            BackendOptions::Socket(socket) => {
                Backend::Socket(SocketBackend::new(context, socket, tls)?)
            }
        })
    }

    /// Start background work: read pumps, accept loops, connects and probes
    pub(crate) async fn start(&self, chr: &Chardev) -> Result<()> {
        match self {
            #[cfg(unix)]
            Backend::Pipe(pipe) => pipe.start(chr),
            #[cfg(unix)]
            Backend::Pty(pty) => pty.start(chr),
            #[cfg(unix)]
            Backend::Serial(serial) => serial.start(chr),
            Backend::Socket(socket) => socket.start(chr).await?,
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            Backend::Null => BackendKind::Null,
            Backend::Ringbuf(_) => BackendKind::Ringbuf,
            Backend::File(_) => BackendKind::File,
            #[cfg(unix)]
            Backend::Pipe(_) => BackendKind::Pipe,
            #[cfg(unix)]
            Backend::Pty(_) => BackendKind::Pty,
            #[cfg(unix)]
            Backend::Serial(_) => BackendKind::Serial,
            Backend::Socket(_) => BackendKind::Socket,
            Backend::Mux(_) => BackendKind::Mux,
        }
    }

    pub(crate) fn filename(&self) -> String {
        match self {
            Backend::Null => "null".to_string(),
            Backend::Ringbuf(ring) => format!("ringbuf:{}", ring.capacity()),
            Backend::File(file) => format!("file:{}", file.path().display()),
            #[cfg(unix)]
            Backend::Pipe(pipe) => pipe.filename(),
            #[cfg(unix)]
            Backend::Pty(pty) => pty.filename(),
            #[cfg(unix)]
            Backend::Serial(serial) => serial.filename(),
            Backend::Socket(socket) => socket.filename(),
            Backend::Mux(mux) => mux.filename(),
        }
    }

    /// Called with the chardev write lock held
    pub(crate) fn write(&self, chr: &Chardev, buf: &[u8]) -> Result<usize> {
        match self {
            Backend::Null => Ok(buf.len()),
            Backend::Ringbuf(ring) => Ok(ring.write(buf)),
            Backend::File(file) => file.write(buf),
            #[cfg(unix)]
            Backend::Pipe(pipe) => pipe.channel().write(buf),
            #[cfg(unix)]
            Backend::Pty(pty) => pty.write(chr, buf),
            #[cfg(unix)]
            Backend::Serial(serial) => serial.channel().write(buf),
            Backend::Socket(socket) => socket.write(chr, buf),
            Backend::Mux(mux) => mux.write(buf),
        }
    }

    pub(crate) async fn read_sync(&self, chr: &Chardev, buf: &mut [u8]) -> Result<usize> {
        match self {
            #[cfg(unix)]
            Backend::Pipe(pipe) => pipe.channel().read_sync(chr, buf).await,
            #[cfg(unix)]
            Backend::Pty(pty) => pty.channel().read_sync(chr, buf).await,
            #[cfg(unix)]
            Backend::Serial(serial) => serial.channel().read_sync(chr, buf).await,
            Backend::Socket(socket) => socket.read_sync(chr, buf).await,
            _ => Err(ChardevError::NotSupported {
                kind: self.kind(),
                operation: "read_sync",
            }),
        }
    }

    pub(crate) fn ioctl(&self, chr: &Chardev, request: ChardevIoctl) -> Result<IoctlReply> {
        match self {
            #[cfg(unix)]
            Backend::Serial(serial) => serial.ioctl(request),
            Backend::Mux(mux) => mux.underlying().ioctl(request),
            _ => {
                tracing::trace!(label = %chr.label(), request = request.name(), "ioctl not supported");
                Err(ChardevError::NotSupported {
                    kind: self.kind(),
                    operation: request.name(),
                })
            }
        }
    }

    pub(crate) fn set_echo(&self, echo: bool) -> Result<()> {
        match self {
            #[cfg(unix)]
            Backend::Pty(pty) => pty.set_echo(echo),
            #[cfg(unix)]
            Backend::Serial(serial) => serial.set_echo(echo),
            Backend::Mux(mux) => mux.underlying().set_echo(echo),
            _ => Ok(()),
        }
    }

    /// Whether readiness watches make sense for this backend
    pub(crate) fn has_descriptor(&self) -> bool {
        match self {
            Backend::Null | Backend::Ringbuf(_) | Backend::File(_) => false,
            Backend::Mux(mux) => mux.underlying().backend().has_descriptor(),
            _ => true,
        }
    }

    /// Whether a write would make progress now; registers for a write-ready
    /// notification when it would not
    pub(crate) fn poll_write_ready(&self) -> bool {
        let poll = match self {
            #[cfg(unix)]
            Backend::Pipe(pipe) => pipe.channel().writer().poll_ready(),
            #[cfg(unix)]
            Backend::Pty(pty) => {
                if !pty.is_connected() {
                    return false;
                }
                pty.channel().writer().poll_ready()
            }
            #[cfg(unix)]
            Backend::Serial(serial) => serial.channel().writer().poll_ready(),
            Backend::Socket(socket) => match socket.poll_write_ready() {
                Some(poll) => poll,
                None => return false,
            },
            _ => return true,
        };
        poll.is_ready()
    }

    /// Release everything; called once, from [`Chardev::close`]
    pub(crate) fn close(&self, chr: &Chardev) {
        match self {
            Backend::Null | Backend::Ringbuf(_) => {}
            Backend::File(file) => file.close(),
            #[cfg(unix)]
            Backend::Pipe(pipe) => pipe.channel().close(),
            #[cfg(unix)]
            Backend::Pty(pty) => pty.close(),
            #[cfg(unix)]
            Backend::Serial(serial) => serial.channel().close(),
            Backend::Socket(socket) => socket.close(chr),
            Backend::Mux(mux) => mux.close(),
        }
    }
}
