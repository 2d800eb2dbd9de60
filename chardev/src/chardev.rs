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

//! The chardev handle
//!
//! A [`Chardev`] is a cheap, clonable handle to one byte channel. All clones
//! refer to the same backend; the channel lives until [`Chardev::close`] is
//! called or the last handle is dropped.

use crate::backend::{Backend, RingbufBackend};
use crate::ioctl::{ChardevIoctl, IoctlReply};
use crate::mux::{MuxBackend, MuxHooks};
use crate::socket::{ConnectionState, TlsCredentials};
use crate::watch::WatchHandle;
use crate::{
    BackendKind, ChardevError, ChardevEvent, ChardevOptions, Frontend, MuxConfig, Result,
    WatchCondition,
};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tracing::{Instrument, debug, info, instrument, trace, warn};

/// Handle to a character device
#[derive(Clone)]
pub struct Chardev {
    inner: Arc<ChardevInner>,
}

pub(crate) struct ChardevInner {
    label: String,
    kind: BackendKind,
    backend: Backend,
    write_lock: Mutex<()>,
    frontend: RwLock<Option<Arc<dyn Frontend>>>,
    be_open: watch::Sender<bool>,
    fe_open: AtomicBool,
    closed: AtomicBool,
    input_ready: Arc<Notify>,
    write_ready: Arc<Notify>,
    logfile: Option<Mutex<File>>,
    runtime: Handle,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Drop for ChardevInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Pieces a backend constructor needs before the chardev exists
pub(crate) struct BackendContext {
    pub(crate) label: String,
    pub(crate) input_ready: Arc<Notify>,
    pub(crate) write_ready: Arc<Notify>,
}

impl BackendContext {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            input_ready: Arc::new(Notify::new()),
            write_ready: Arc::new(Notify::new()),
        }
    }
}

impl Chardev {
    /// Create a chardev from validated options
    ///
    /// Must be called from within a tokio runtime. Fails when the options
    /// name TLS credentials; use [`Chardev::open_with_tls`] or a
    /// [`ChardevRegistry`](crate::ChardevRegistry) for those.
    pub async fn open(options: ChardevOptions) -> Result<Chardev> {
        Self::open_with_tls(options, None).await
    }

    /// Create a chardev, using `tls` for a socket backend that names credentials
    #[instrument(skip(options, tls), fields(label = %options.label, kind = %options.backend.kind()))]
    pub async fn open_with_tls(
        options: ChardevOptions,
        tls: Option<Arc<TlsCredentials>>,
    ) -> Result<Chardev> {
        options.validate()?;
        let logfile = match options.logfile {
            Some(ref path) => Some(open_logfile(path, options.logappend)?),
            None => None,
        };
        let base_label = match options.mux {
            Some(_) => format!("{}-base", options.label),
            None => options.label.clone(),
        };

        let context = BackendContext::new(&base_label);
        let backend = Backend::create(&context, &options.backend, tls)?;
        let chr = Chardev::from_backend(context, options.backend.kind(), backend, logfile);
        if let Err(err) = chr.inner.backend.start(&chr).await {
            chr.close();
            return Err(err);
        }
        info!(filename = %chr.filename(), "chardev opened");

        match options.mux {
            Some(config) => Chardev::open_mux(options.label, chr, config, MuxHooks::default(), true),
            None => Ok(chr),
        }
    }

    /// Wrap `underlying` in a multiplexer labelled `label`
    ///
    /// With `owns_underlying`, closing the mux also closes `underlying`.
    pub fn open_mux(
        label: impl Into<String>,
        underlying: Chardev,
        config: MuxConfig,
        hooks: MuxHooks,
        owns_underlying: bool,
    ) -> Result<Chardev> {
        config.validate()?;
        let label = label.into();
        let open = underlying.is_open();
        let mut context = BackendContext::new(&label);
        context.write_ready = underlying.write_ready();
        let backend = Backend::Mux(MuxBackend::new(underlying, config, hooks, owns_underlying));
        let chr = Chardev::from_backend(context, BackendKind::Mux, backend, None);
        chr.inner.be_open.send_replace(open);
        debug!(label = %chr.label(), "mux created");
        Ok(chr)
    }

    fn from_backend(
        context: BackendContext,
        kind: BackendKind,
        backend: Backend,
        logfile: Option<File>,
    ) -> Chardev {
        let (be_open, _) = watch::channel(false);
        let chr = Chardev {
            inner: Arc::new(ChardevInner {
                label: context.label,
                kind,
                backend,
                write_lock: Mutex::new(()),
                frontend: RwLock::new(None),
                be_open,
                fe_open: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                input_ready: context.input_ready,
                write_ready: context.write_ready,
                logfile: logfile.map(Mutex::new),
                runtime: Handle::current(),
                tasks: Mutex::new(Vec::new()),
            }),
        };
        if !kind.explicit_open() {
            chr.inner.be_open.send_replace(true);
        }
        chr
    }

    pub(crate) fn downgrade(&self) -> Weak<ChardevInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ChardevInner>) -> Option<Chardev> {
        weak.upgrade().map(|inner| Chardev { inner })
    }

    pub(crate) fn input_ready(&self) -> Arc<Notify> {
        self.inner.input_ready.clone()
    }

    pub(crate) fn write_ready(&self) -> Arc<Notify> {
        self.inner.write_ready.clone()
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    /// Run `future` on the chardev's runtime until it finishes or the chardev closes
    ///
    /// The task stays inside the caller's span.
    pub(crate) fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self
            .inner
            .runtime
            .spawn(future.in_current_span())
            .abort_handle();
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        if self.is_closed() {
            handle.abort();
        } else {
            tasks.push(handle.clone());
        }
        handle
    }

    /// Chardev a multiplexer sits on
    pub fn underlying(&self) -> Option<&Chardev> {
        match self.inner.backend {
            Backend::Mux(ref mux) => Some(mux.underlying()),
            _ => None,
        }
    }

    /// Index of the focused mux frontend
    pub fn mux_focus(&self) -> Option<usize> {
        match self.inner.backend {
            Backend::Mux(ref mux) => mux.focus(),
            _ => None,
        }
    }

    /// Whether a mux is prefixing output lines with timestamps
    pub fn mux_timestamps(&self) -> bool {
        match self.inner.backend {
            Backend::Mux(ref mux) => mux.timestamps(),
            _ => false,
        }
    }

    /// Connection phase of a socket chardev
    pub fn connection_state(&self) -> Option<ConnectionState> {
        match self.inner.backend {
            Backend::Socket(ref socket) => Some(socket.phase()),
            Backend::Mux(ref mux) => mux.underlying().connection_state(),
            _ => None,
        }
    }

    /// Unique label
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Backend kind
    pub fn kind(&self) -> BackendKind {
        self.inner.kind
    }

    /// Human readable description of the endpoint, e.g. `pty:/dev/pts/3`
    pub fn filename(&self) -> String {
        self.inner.backend.filename()
    }

    /// Whether the backend is ready for I/O
    pub fn is_open(&self) -> bool {
        *self.inner.be_open.borrow()
    }

    /// Receiver tracking [`Chardev::is_open`]
    pub fn open_state(&self) -> watch::Receiver<bool> {
        self.inner.be_open.subscribe()
    }

    /// Whether the frontend reported itself open
    pub fn is_frontend_open(&self) -> bool {
        self.inner.fe_open.load(Ordering::Acquire)
    }

    /// Whether [`Chardev::close`] ran
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Write as much of `buf` as the backend accepts without blocking
    ///
    /// Returns the number of bytes taken, which may be 0. Callers that need
    /// everything written use [`Chardev::write_all`]. Writes from different
    /// threads never interleave within one call.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(ChardevError::Closed(self.inner.label.clone()));
        }
        let _guard = self.inner.write_lock.lock();
        let written = self.inner.backend.write(self, buf)?;
        if written > 0 {
            self.log_output(&buf[..written]);
            counter!("chario.bytes.written", "kind" => self.inner.kind.name())
                .increment(written as u64);
        }
        Ok(written)
    }

    /// Write all of `buf`, waiting for the backend to drain between partial writes
    pub async fn write_all(&self, buf: &[u8]) -> Result<usize> {
        let mut offset = 0;
        while offset < buf.len() {
            let ready = self.inner.write_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();
            let written = self.write(&buf[offset..])?;
            offset += written;
            if written == 0 {
                ready.await;
                tokio::task::yield_now().await;
            }
        }
        Ok(offset)
    }

    /// Format and write, waiting for the whole text to go out
    pub fn print(&self, args: fmt::Arguments<'_>) -> impl Future<Output = Result<usize>> + '_ {
        let text = args.to_string();
        async move { self.write_all(text.as_bytes()).await }
    }

    /// Read directly from the backend, bypassing the frontend
    ///
    /// Only sockets, pipes, ptys and serial devices support this. It competes
    /// with the read pump, so it fails with [`ChardevError::ReaderBusy`] while an
    /// attached frontend is being fed. Never call it from a frontend callback.
    pub async fn read_sync(&self, buf: &mut [u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(ChardevError::Closed(self.inner.label.clone()));
        }
        self.inner.backend.read_sync(self, buf).await
    }

    /// Fill `buf` with direct reads, stopping early at end of stream
    pub async fn read_all(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        while offset < buf.len() {
            match self.read_sync(&mut buf[offset..]).await? {
                0 => break,
                len => offset += len,
            }
        }
        Ok(offset)
    }

    /// Device control
    pub fn ioctl(&self, request: ChardevIoctl) -> Result<IoctlReply> {
        if self.is_closed() {
            return Err(ChardevError::Closed(self.inner.label.clone()));
        }
        self.inner.backend.ioctl(self, request)
    }

    fn ringbuf(&self) -> Result<&RingbufBackend> {
        match self.inner.backend {
            Backend::Ringbuf(ref ring) => Ok(ring),
            _ => Err(ChardevError::InvalidArgument(format!(
                "{} is not a ringbuf device",
                self.inner.label
            ))),
        }
    }

    /// Store bytes in a ring buffer chardev, as if written by the frontend
    pub fn ringbuf_write(&self, data: &[u8]) -> Result<()> {
        let ring = self.ringbuf()?;
        let _guard = self.inner.write_lock.lock();
        ring.write(data);
        Ok(())
    }

    /// Take up to `max` of the oldest buffered bytes from a ring buffer chardev
    pub fn ringbuf_read(&self, max: usize) -> Result<Vec<u8>> {
        let ring = self.ringbuf()?;
        let _guard = self.inner.write_lock.lock();
        ring.read(max)
    }

    /// Bytes currently buffered in a ring buffer chardev
    pub fn ringbuf_count(&self) -> Result<usize> {
        Ok(self.ringbuf()?.count())
    }

    /// Local address of a TCP socket chardev (listening or connected)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.inner.backend {
            Backend::Socket(ref socket) => socket.local_addr(),
            Backend::Mux(ref mux) => mux.underlying().local_addr(),
            _ => None,
        }
    }

    /// Slave device path of a pty chardev
    #[cfg(unix)]
    pub fn pty_path(&self) -> Option<&str> {
        match self.inner.backend {
            Backend::Pty(ref pty) => Some(pty.path()),
            _ => None,
        }
    }

    /// Toggle local echo on terminal backends; a no-op elsewhere
    pub fn set_echo(&self, echo: bool) -> Result<()> {
        self.inner.backend.set_echo(echo)
    }

    /// Run `callback` once when `condition` holds
    ///
    /// Returns `None` when the backend has no descriptor to watch.
    pub fn add_watch<F>(&self, condition: WatchCondition, callback: F) -> Option<WatchHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() || !self.inner.backend.has_descriptor() {
            return None;
        }
        if let Backend::Mux(ref mux) = self.inner.backend {
            return mux.underlying().add_watch(condition, callback);
        }
        let handle = match condition {
            WatchCondition::Out => {
                let weak = self.downgrade();
                let ready = self.write_ready();
                self.spawn(async move {
                    loop {
                        let notified = ready.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();
                        let Some(chr) = Chardev::upgrade(&weak) else {
                            return;
                        };
                        let writable = chr.inner.backend.poll_write_ready();
                        drop(chr);
                        if writable {
                            callback();
                            return;
                        }
                        notified.await;
                    }
                })
            }
            WatchCondition::Hup => {
                let mut open = self.open_state();
                self.spawn(async move {
                    if open.wait_for(|open| !*open).await.is_ok() {
                        callback();
                    }
                })
            }
        };
        Some(WatchHandle::new(handle))
    }

    /// Attach a frontend
    ///
    /// A plain chardev takes one frontend and returns tag 0; a mux returns the
    /// slot index. When the backend is already open the frontend immediately
    /// receives [`ChardevEvent::Opened`].
    #[instrument(skip(self, frontend), fields(label = %self.inner.label))]
    pub fn attach(&self, frontend: Arc<dyn Frontend>) -> Result<usize> {
        if self.is_closed() {
            return Err(ChardevError::Closed(self.inner.label.clone()));
        }
        if let Backend::Mux(ref mux) = self.inner.backend {
            return mux.attach(self, frontend);
        }
        {
            let mut slot = self.inner.frontend.write();
            if slot.is_some() {
                warn!("frontend already attached");
                return Err(ChardevError::FrontendAttached(self.inner.label.clone()));
            }
            *slot = Some(frontend.clone());
        }
        self.inner.fe_open.store(true, Ordering::Release);
        self.inner.input_ready.notify_one();
        debug!("frontend attached");
        if self.is_open() {
            frontend.event(ChardevEvent::Opened);
        }
        Ok(0)
    }

    /// Detach the frontend(s); input stops until the next attach
    #[instrument(skip(self), fields(label = %self.inner.label))]
    pub fn detach(&self) {
        if let Backend::Mux(ref mux) = self.inner.backend {
            mux.detach_all();
        }
        let previous = self.inner.frontend.write().take();
        self.inner.fe_open.store(false, Ordering::Release);
        self.inner.input_ready.notify_one();
        if previous.is_some() {
            debug!("frontend detached");
        }
    }

    /// Frontend reports whether it is ready for data
    pub fn set_frontend_open(&self, open: bool) {
        let previous = self.inner.fe_open.swap(open, Ordering::AcqRel);
        if previous != open {
            trace!(label = %self.inner.label, open, "frontend open state changed");
        }
        if let Backend::Mux(ref mux) = self.inner.backend {
            mux.underlying().set_frontend_open(open);
        }
    }

    /// Frontend freed capacity; re-evaluate input now instead of on the next poll
    pub fn accept_input(&self) {
        if let Backend::Mux(ref mux) = self.inner.backend {
            mux.accept_input();
            mux.underlying().accept_input();
        }
        self.inner.input_ready.notify_one();
    }

    /// Close the chardev
    ///
    /// Cancels every watch, timer and pending handshake, releases the backend,
    /// then tells the frontend [`ChardevEvent::Closed`]. Calling it again, also
    /// from inside that event, does nothing.
    #[instrument(skip(self), fields(label = %self.inner.label))]
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let tasks: Vec<AbortHandle> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.inner.backend.close(self);
        self.inner.write_ready.notify_waiters();
        self.inner.input_ready.notify_waiters();
        info!("chardev closed");
        self.be_event(ChardevEvent::Closed);
        if let Backend::Mux(ref mux) = self.inner.backend {
            mux.clear_slots();
        }
    }

    // Backend side

    pub(crate) fn has_frontend(&self) -> bool {
        match self.inner.backend {
            Backend::Mux(ref mux) => mux.frontend_count() > 0,
            _ => self.inner.frontend.read().is_some(),
        }
    }

    fn frontend(&self) -> Option<Arc<dyn Frontend>> {
        self.inner.frontend.read().clone()
    }

    /// Deliver a lifecycle event; updates the open state for `Opened`/`Closed`
    pub(crate) fn be_event(&self, event: ChardevEvent) {
        match event {
            ChardevEvent::Opened => {
                self.inner.be_open.send_replace(true);
                self.inner.write_ready.notify_waiters();
            }
            ChardevEvent::Closed => {
                self.inner.be_open.send_replace(false);
            }
            _ => {}
        }
        trace!(label = %self.inner.label, %event, "backend event");
        if let Backend::Mux(ref mux) = self.inner.backend {
            mux.broadcast(event);
            return;
        }
        if let Some(frontend) = self.frontend() {
            frontend.event(event);
        }
    }

    pub(crate) fn be_can_receive(&self) -> usize {
        self.frontend().map_or(0, |frontend| frontend.can_receive())
    }

    pub(crate) fn be_receive(&self, data: &[u8]) {
        if let Some(frontend) = self.frontend() {
            frontend.receive(data);
        }
    }

    fn log_output(&self, data: &[u8]) {
        if let Some(ref logfile) = self.inner.logfile {
            if let Err(err) = logfile.lock().write_all(data) {
                debug!(label = %self.inner.label, error = %err, "log write failed");
            }
        }
    }
}

impl fmt::Debug for Chardev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chardev")
            .field("label", &self.inner.label)
            .field("kind", &self.inner.kind)
            .field("open", &self.is_open())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn open_logfile(path: &Path, append: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path).map_err(|err| {
        ChardevError::config("logfile", format!("{}: {err}", path.display()))
    })
}
