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

//! termios helpers shared by the pty and serial backends

use crate::ioctl::{ModemLines, Parity, SerialParams};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn get_attr(fd: RawFd) -> io::Result<libc::termios> {
    let mut tty = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr fills the whole struct on success
    check(unsafe { libc::tcgetattr(fd, tty.as_mut_ptr()) })?;
    // SAFETY: initialised by the successful call above
    Ok(unsafe { tty.assume_init() })
}

fn set_attr(fd: RawFd, tty: &libc::termios) -> io::Result<()> {
    // SAFETY: tty is a valid termios obtained from tcgetattr
    check(unsafe { libc::tcsetattr(fd, libc::TCSANOW, tty) })
}

/// Put the terminal in raw mode
pub(crate) fn make_raw(fd: RawFd) -> io::Result<()> {
    let mut tty = get_attr(fd)?;
    // SAFETY: tty is a valid termios
    unsafe { libc::cfmakeraw(&mut tty) };
    set_attr(fd, &tty)
}

/// Toggle local echo
pub(crate) fn set_echo(fd: RawFd, echo: bool) -> io::Result<()> {
    let mut tty = get_attr(fd)?;
    if echo {
        tty.c_lflag |= libc::ECHO;
    } else {
        tty.c_lflag &= !libc::ECHO;
    }
    set_attr(fd, &tty)
}

/// Nearest supported rate at or above `speed`, after the usual 10/11 slack
fn speed_constant(speed: u32) -> libc::speed_t {
    const TABLE: &[(u32, libc::speed_t)] = &[
        (50, libc::B50),
        (75, libc::B75),
        (110, libc::B110),
        (134, libc::B134),
        (150, libc::B150),
        (200, libc::B200),
        (300, libc::B300),
        (600, libc::B600),
        (1200, libc::B1200),
        (1800, libc::B1800),
        (2400, libc::B2400),
        (4800, libc::B4800),
        (9600, libc::B9600),
        (19200, libc::B19200),
        (38400, libc::B38400),
        (57600, libc::B57600),
        (115_200, libc::B115200),
        (230_400, libc::B230400),
    ];
    let speed = u64::from(speed) * 10 / 11;
    TABLE
        .iter()
        .find(|(rate, _)| speed <= u64::from(*rate))
        .map_or(libc::B115200, |(_, constant)| *constant)
}

/// Program speed, framing and raw input processing
pub(crate) fn serial_init(fd: RawFd, params: &SerialParams) -> io::Result<()> {
    let mut tty = get_attr(fd)?;
    let speed = speed_constant(params.speed);
    // SAFETY: tty is a valid termios
    check(unsafe { libc::cfsetispeed(&mut tty, speed) })?;
    // SAFETY: as above
    check(unsafe { libc::cfsetospeed(&mut tty, speed) })?;

    tty.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON);
    tty.c_oflag |= libc::OPOST;
    tty.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::IEXTEN | libc::ISIG);
    tty.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::PARODD | libc::CRTSCTS | libc::CSTOPB);
    tty.c_cflag |= match params.data_bits {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        _ => libc::CS8,
    };
    match params.parity {
        Parity::None => {}
        Parity::Even => tty.c_cflag |= libc::PARENB,
        Parity::Odd => tty.c_cflag |= libc::PARENB | libc::PARODD,
    }
    if params.stop_bits == 2 {
        tty.c_cflag |= libc::CSTOPB;
    }
    set_attr(fd, &tty)
}

pub(crate) fn send_break(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain syscall on an open descriptor
    check(unsafe { libc::tcsendbreak(fd, 1) })
}

pub(crate) fn get_modem_lines(fd: RawFd) -> io::Result<ModemLines> {
    let mut bits: libc::c_int = 0;
    // SAFETY: TIOCMGET writes one c_int
    check(unsafe { libc::ioctl(fd, libc::TIOCMGET, &mut bits) })?;
    Ok(ModemLines::from_tiocm(bits))
}

pub(crate) fn set_modem_lines(fd: RawFd, lines: ModemLines) -> io::Result<()> {
    let managed = ModemLines::DTR
        | ModemLines::RTS
        | ModemLines::CTS
        | ModemLines::CAR
        | ModemLines::RI
        | ModemLines::DSR;
    let mut bits: libc::c_int = 0;
    // SAFETY: TIOCMGET writes one c_int
    check(unsafe { libc::ioctl(fd, libc::TIOCMGET, &mut bits) })?;
    bits &= !managed.to_tiocm();
    bits |= lines.to_tiocm();
    // SAFETY: TIOCMSET reads one c_int
    check(unsafe { libc::ioctl(fd, libc::TIOCMSET, &bits) })
}
