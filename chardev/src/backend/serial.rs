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

//! Host serial device backend

use super::fd::FdChannel;
use super::tty;
use crate::chardev::BackendContext;
use crate::config::SerialOptions;
use crate::ioctl::{ChardevIoctl, IoctlReply, SerialParams};
use crate::watch::PumpExit;
use crate::{Chardev, ChardevEvent, Result};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use tracing::{debug, instrument, warn};

pub(crate) struct SerialBackend {
    path: PathBuf,
    channel: FdChannel,
}

impl SerialBackend {
    pub(crate) fn open(context: &BackendContext, options: &SerialOptions) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&options.path)?;
        let channel = FdChannel::single(context.write_ready.clone(), file)?;
        tty::serial_init(channel.input_fd(), &SerialParams::new(options.speed))?;
        Ok(Self {
            path: options.path.clone(),
            channel,
        })
    }

    pub(crate) fn filename(&self) -> String {
        format!("serial:{}", self.path.display())
    }

    pub(crate) fn channel(&self) -> &FdChannel {
        &self.channel
    }

    pub(crate) fn start(&self, chr: &Chardev) {
        self.channel.start_pump(chr, |chr, exit| {
            if let PumpExit::Error(ref err) = exit {
                warn!(label = %chr.label(), error = %err, "serial read failed");
            }
            if !matches!(exit, PumpExit::Released) {
                chr.be_event(ChardevEvent::Closed);
            }
        });
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub(crate) fn ioctl(&self, request: ChardevIoctl) -> Result<IoctlReply> {
        let fd = self.channel.input_fd();
        match request {
            ChardevIoctl::SetSerialParams(params) => {
                params.validate()?;
                tty::serial_init(fd, &params)?;
                debug!(speed = params.speed, "serial parameters updated");
                Ok(IoctlReply::Done)
            }
            ChardevIoctl::SetBreak(enable) => {
                if enable {
                    tty::send_break(fd)?;
                }
                Ok(IoctlReply::Done)
            }
            ChardevIoctl::GetModemLines => Ok(IoctlReply::ModemLines(tty::get_modem_lines(fd)?)),
            ChardevIoctl::SetModemLines(lines) => {
                tty::set_modem_lines(fd, lines)?;
                Ok(IoctlReply::Done)
            }
        }
    }

    pub(crate) fn set_echo(&self, echo: bool) -> Result<()> {
        Ok(tty::set_echo(self.channel.input_fd(), echo)?)
    }
}
