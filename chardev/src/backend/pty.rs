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

//! Pseudo terminal backend
//!
//! The master side is ours; a peer is considered connected once polling the
//! master no longer reports a hang-up. While nobody holds the slave open the
//! connection is re-probed once per second and on every write attempt.

use super::fd::FdChannel;
use super::{Backend, tty};
use crate::chardev::BackendContext;
use crate::watch::PumpExit;
use crate::{Chardev, ChardevError, ChardevEvent, Result};
use parking_lot::Mutex;
use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Re-probe interval while no peer is attached to the slave
pub const PTY_PROBE_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct PtyBackend {
    path: String,
    channel: FdChannel,
    connected: AtomicBool,
    probe: Mutex<Option<AbortHandle>>,
}

fn open_master() -> io::Result<(File, String)> {
    // SAFETY: posix_openpt returns a fresh descriptor or -1
    let fd = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by posix_openpt and is owned here
    let master = unsafe { File::from_raw_fd(fd) };
    // SAFETY: fd is a pty master
    if unsafe { libc::grantpt(fd) } < 0 || unsafe { libc::unlockpt(fd) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let path = slave_name(fd)?;
    Ok((master, path))
}

#[cfg(target_os = "linux")]
fn slave_name(fd: RawFd) -> io::Result<String> {
    let mut buf = [0 as libc::c_char; 128];
    // SAFETY: buf is writable for its full length
    let ret = unsafe { libc::ptsname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret));
    }
    // SAFETY: ptsname_r wrote a NUL terminated string into buf
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

#[cfg(not(target_os = "linux"))]
fn slave_name(fd: RawFd) -> io::Result<String> {
    // SAFETY: ptsname returns a pointer to static storage or NULL
    let ptr = unsafe { libc::ptsname(fd) };
    if ptr.is_null() {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: non-null result is a NUL terminated string
    let name = unsafe { CStr::from_ptr(ptr) };
    Ok(name.to_string_lossy().into_owned())
}

/// A master reports `POLLHUP` until some process opens the slave
fn peer_connected(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    // SAFETY: pfd is a single valid pollfd
    let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
    ret >= 0 && pfd.revents & libc::POLLHUP == 0
}

impl PtyBackend {
    pub(crate) fn open(context: &BackendContext) -> Result<Self> {
        let (master, path) = open_master()?;

        // Raw mode is set through the slave, then the slave is closed so the
        // master reports a hang-up until a real peer opens it.
        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)?;
        tty::make_raw(std::os::fd::AsRawFd::as_raw_fd(&slave))?;
        drop(slave);

        info!(label = %context.label, path = %path, "char device redirected to {path}");
        Ok(Self {
            path,
            channel: FdChannel::single(context.write_ready.clone(), master)?,
            connected: AtomicBool::new(false),
            probe: Mutex::new(None),
        })
    }

    /// Slave device path, e.g. `/dev/pts/3`
    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn filename(&self) -> String {
        format!("pty:{}", self.path)
    }

    pub(crate) fn channel(&self) -> &FdChannel {
        &self.channel
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn start(&self, chr: &Chardev) {
        self.schedule_probe(chr);
    }

    /// Start probing for a peer, the first probe runs immediately
    fn schedule_probe(&self, chr: &Chardev) {
        let weak = chr.downgrade();
        let handle = chr.spawn(async move {
            let mut interval = tokio::time::interval(PTY_PROBE_INTERVAL);
            loop {
                interval.tick().await;
                let Some(chr) = Chardev::upgrade(&weak) else {
                    return;
                };
                if let Backend::Pty(ref pty) = *chr.backend() {
                    if pty.probe_once(&chr) {
                        return;
                    }
                }
            }
        });
        if let Some(previous) = self.probe.lock().replace(handle) {
            previous.abort();
        }
    }

    fn probe_once(&self, chr: &Chardev) -> bool {
        if self.is_connected() {
            return true;
        }
        if !peer_connected(self.channel.output_fd()) {
            return false;
        }
        self.connected.store(true, Ordering::Release);
        debug!(label = %chr.label(), path = %self.path, "pty peer connected");
        self.channel.start_pump(chr, |chr, exit| {
            if let Backend::Pty(ref pty) = *chr.backend() {
                pty.lost(chr, exit);
            }
        });
        chr.be_event(ChardevEvent::Opened);
        true
    }

    /// The slave side went away (EIO on the master); wait for the next peer
    fn lost(&self, chr: &Chardev, exit: PumpExit) {
        if matches!(exit, PumpExit::Released) {
            return;
        }
        debug!(label = %chr.label(), ?exit, "pty peer disconnected");
        self.connected.store(false, Ordering::Release);
        chr.be_event(ChardevEvent::Closed);
        self.schedule_probe(chr);
    }

    /// Write to the peer; while disconnected nothing is taken and a probe runs
    pub(crate) fn write(&self, chr: &Chardev, buf: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            if !chr.is_closed() {
                self.schedule_probe(chr);
            }
            return Ok(0);
        }
        match self.channel.write(buf) {
            Ok(written) => Ok(written),
            Err(ChardevError::Io(err)) if err.raw_os_error() == Some(libc::EIO) => Ok(0),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn set_echo(&self, echo: bool) -> Result<()> {
        Ok(tty::set_echo(self.channel.input_fd(), echo)?)
    }

    pub(crate) fn close(&self) {
        if let Some(probe) = self.probe.lock().take() {
            probe.abort();
        }
        self.channel.close();
    }
}
