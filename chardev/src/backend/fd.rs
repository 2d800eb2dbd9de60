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

//! Non-blocking descriptor channels for pipes, ptys and ttys

use crate::channel::{ChannelWriter, SharedReader, shared_reader};
use crate::watch::{PumpExit, ReadPump};
use crate::{Chardev, ChardevError, Result};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::AbortHandle;

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A file descriptor registered with the reactor
#[derive(Clone)]
pub(crate) struct FdStream {
    fd: Arc<AsyncFd<File>>,
}

impl FdStream {
    pub(crate) fn new(file: File) -> io::Result<FdStream> {
        set_nonblocking(file.as_raw_fd())?;
        Ok(FdStream {
            fd: Arc::new(AsyncFd::new(file)?),
        })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsyncRead for FdStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for FdStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.write(buf)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Input and output descriptors of one chardev plus its read pump
pub(crate) struct FdChannel {
    input: FdStream,
    output: FdStream,
    reader: SharedReader,
    writer: Arc<ChannelWriter>,
    pump: parking_lot::Mutex<Option<AbortHandle>>,
}

impl FdChannel {
    /// Channel reading `input` and writing `output`
    pub(crate) fn new(chr_ready: Arc<tokio::sync::Notify>, input: File, output: File) -> Result<Self> {
        let input = FdStream::new(input)?;
        let output = FdStream::new(output)?;
        Ok(Self::from_streams(chr_ready, input, output))
    }

    /// Channel reading and writing one descriptor
    pub(crate) fn single(chr_ready: Arc<tokio::sync::Notify>, file: File) -> Result<Self> {
        let stream = FdStream::new(file)?;
        Ok(Self::from_streams(chr_ready, stream.clone(), stream))
    }

    fn from_streams(chr_ready: Arc<tokio::sync::Notify>, input: FdStream, output: FdStream) -> Self {
        FdChannel {
            reader: shared_reader(Box::new(input.clone())),
            writer: Arc::new(ChannelWriter::new(Box::new(output.clone()), chr_ready)),
            input,
            output,
            pump: parking_lot::Mutex::new(None),
        }
    }

    pub(crate) fn input_fd(&self) -> RawFd {
        self.input.raw_fd()
    }

    pub(crate) fn output_fd(&self) -> RawFd {
        self.output.raw_fd()
    }

    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        Ok(self.writer.try_write(buf)?)
    }

    pub(crate) fn writer(&self) -> &ChannelWriter {
        &self.writer
    }

    pub(crate) async fn read_sync(&self, chr: &Chardev, buf: &mut [u8]) -> Result<usize> {
        use tokio::io::AsyncReadExt;
        let mut reader = self
            .reader
            .try_lock()
            .map_err(|_| ChardevError::ReaderBusy(chr.label().to_string()))?;
        Ok(reader.read(buf).await?)
    }

    /// Start delivering input to the frontend; `on_exit` runs when the pump stops
    pub(crate) fn start_pump<F>(&self, chr: &Chardev, on_exit: F)
    where
        F: FnOnce(&Chardev, PumpExit) + Send + 'static,
    {
        let pump = ReadPump::new(chr, self.reader.clone(), None);
        let weak = chr.downgrade();
        let handle = chr.spawn(async move {
            let exit = pump.run().await;
            if let Some(chr) = Chardev::upgrade(&weak) {
                on_exit(&chr, exit);
            }
        });
        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn close(&self) {
        self.stop_pump();
        self.writer.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn pipe() -> (File, File) {
        let mut fds = [0; 2];
        // SAFETY: fds has room for two descriptors
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        // SAFETY: pipe() returned two fresh descriptors we now own
        unsafe {
            use std::os::fd::FromRawFd;
            (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1]))
        }
    }

    #[tokio::test]
    async fn test_fd_stream_round_trip() {
        let (rx, tx) = pipe();
        let mut reader = FdStream::new(rx).unwrap();
        let mut writer = FdStream::new(tx).unwrap();
        writer.write_all(b"through the pipe").await.unwrap();
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through the pipe");
    }

    #[tokio::test]
    async fn test_fd_stream_eof() {
        let (rx, tx) = pipe();
        let mut reader = FdStream::new(rx).unwrap();
        drop(tx);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }
}
