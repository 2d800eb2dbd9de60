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

//! Byte channel plumbing shared by descriptor backed chardevs
//!
//! Writes happen synchronously from any thread: the writer half is polled once
//! with a waker that, when the I/O driver later reports the channel writable,
//! wakes everything waiting on the chardev's write-ready [`Notify`].

use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;

/// Anything usable as a full duplex byte stream
pub(crate) trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub(crate) type BoxStream = Box<dyn Duplex>;
pub(crate) type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half shared between the read pump and direct reads
pub(crate) type SharedReader = Arc<tokio::sync::Mutex<BoxReader>>;

pub(crate) fn shared_reader(reader: BoxReader) -> SharedReader {
    Arc::new(tokio::sync::Mutex::new(reader))
}

struct NotifyWaker(Arc<Notify>);

impl Wake for NotifyWaker {
    fn wake(self: Arc<Self>) {
        self.0.notify_waiters();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.notify_waiters();
    }
}

/// Write half with non-blocking, partial-count semantics
pub(crate) struct ChannelWriter {
    writer: Mutex<Option<BoxWriter>>,
    waker: Waker,
}

impl ChannelWriter {
    pub(crate) fn new(writer: BoxWriter, ready: Arc<Notify>) -> ChannelWriter {
        ChannelWriter {
            writer: Mutex::new(Some(writer)),
            waker: Waker::from(Arc::new(NotifyWaker(ready))),
        }
    }

    /// Offer `buf` to the channel, returning how much was taken; 0 means try
    /// again once write-ready fires
    pub(crate) fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut cx = Context::from_waker(&self.waker);
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let written = match Pin::new(&mut **writer).poll_write(&mut cx, buf) {
            Poll::Ready(Ok(n)) => n,
            Poll::Ready(Err(err)) => return Err(err),
            Poll::Pending => 0,
        };
        if let Poll::Ready(Err(err)) = Pin::new(&mut **writer).poll_flush(&mut cx) {
            return Err(err);
        }
        Ok(written)
    }

    /// Whether a write would currently make progress. Registers for a
    /// write-ready notification when it would not.
    pub(crate) fn poll_ready(&self) -> Poll<io::Result<()>> {
        let mut cx = Context::from_waker(&self.waker);
        let mut guard = self.writer.lock();
        match guard.as_mut() {
            Some(writer) => Pin::new(&mut **writer)
                .poll_write(&mut cx, &[])
                .map_ok(|_| ()),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    /// Push out anything the stream buffered internally
    pub(crate) fn poll_flush(&self) -> Poll<io::Result<()>> {
        let mut cx = Context::from_waker(&self.waker);
        let mut guard = self.writer.lock();
        match guard.as_mut() {
            Some(writer) => Pin::new(&mut **writer).poll_flush(&mut cx),
            None => Poll::Ready(Ok(())),
        }
    }

    /// Drop the write half; later writes fail with `NotConnected`
    pub(crate) fn release(&self) {
        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            let mut cx = Context::from_waker(&self.waker);
            let _ = Pin::new(&mut *writer).poll_shutdown(&mut cx);
        }
    }
}

/// Keep flushing a buffering writer (TLS) whenever the channel becomes writable
pub(crate) async fn flush_driver(writer: Arc<ChannelWriter>, ready: Arc<Notify>) -> io::Error {
    loop {
        let notified = ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Poll::Ready(Err(err)) = writer.poll_flush() {
            return err;
        }
        notified.await;
    }
}
