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

//! Named pipe backend

use super::fd::FdChannel;
use crate::chardev::BackendContext;
use crate::watch::PumpExit;
use crate::{Chardev, ChardevEvent, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(crate) struct PipeBackend {
    path: PathBuf,
    channel: FdChannel,
}

fn open_rdwr(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl PipeBackend {
    /// Open `path.in`/`path.out` when both exist, `path` for both directions otherwise
    pub(crate) fn open(context: &BackendContext, path: &Path) -> Result<Self> {
        let pair = open_rdwr(&with_suffix(path, ".in"))
            .and_then(|input| Ok((input, open_rdwr(&with_suffix(path, ".out"))?)));
        let channel = match pair {
            Ok((input, output)) => {
                debug!(path = %path.display(), "pipe opened as in/out pair");
                FdChannel::new(context.write_ready.clone(), input, output)?
            }
            Err(_) => FdChannel::single(context.write_ready.clone(), open_rdwr(path)?)?,
        };
        Ok(Self {
            path: path.to_path_buf(),
            channel,
        })
    }

    pub(crate) fn filename(&self) -> String {
        format!("pipe:{}", self.path.display())
    }

    pub(crate) fn channel(&self) -> &FdChannel {
        &self.channel
    }

    pub(crate) fn start(&self, chr: &Chardev) {
        self.channel.start_pump(chr, |chr, exit| {
            if let PumpExit::Error(ref err) = exit {
                warn!(label = %chr.label(), error = %err, "pipe read failed");
            }
            if !matches!(exit, PumpExit::Released) {
                chr.be_event(ChardevEvent::Closed);
            }
        });
    }
}
