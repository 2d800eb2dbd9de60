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

//! Device control requests

use crate::{ChardevError, Result};
use std::fmt;

/// Device control request, see [`Chardev::ioctl`](crate::Chardev::ioctl)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChardevIoctl {
    /// Reprogram line speed and framing
    SetSerialParams(SerialParams),
    /// Send a break condition when `true`
    SetBreak(bool),
    /// Read the modem control lines
    GetModemLines,
    /// Drive the modem control lines
    SetModemLines(ModemLines),
}

impl ChardevIoctl {
    /// Request name, used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetSerialParams(_) => "set-serial-params",
            Self::SetBreak(_) => "set-break",
            Self::GetModemLines => "get-modem-lines",
            Self::SetModemLines(_) => "set-modem-lines",
        }
    }
}

/// Answer to a [`ChardevIoctl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlReply {
    /// Request carried out
    Done,
    /// Current modem line state
    ModemLines(ModemLines),
}

/// Serial parity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl Parity {
    /// Parse the customary `N`/`E`/`O` letter
    pub fn from_letter(letter: char) -> Option<Parity> {
        match letter.to_ascii_uppercase() {
            'N' => Some(Parity::None),
            'E' => Some(Parity::Even),
            'O' => Some(Parity::Odd),
            _ => None,
        }
    }
}

/// Serial line parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    /// Line speed in baud
    pub speed: u32,
    /// Parity
    pub parity: Parity,
    /// Data bits, 5 to 8
    pub data_bits: u8,
    /// Stop bits, 1 or 2
    pub stop_bits: u8,
}

impl SerialParams {
    /// 8N1 at `speed`
    pub fn new(speed: u32) -> Self {
        Self {
            speed,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
        }
    }

    /// Set parity
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set data bits
    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set stop bits
    pub fn with_stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if self.speed == 0 {
            return Err(ChardevError::InvalidArgument("speed must be non-zero".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ChardevError::InvalidArgument(format!(
                "{} data bits, expected 5 to 8",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ChardevError::InvalidArgument(format!(
                "{} stop bits, expected 1 or 2",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

/// Modem control line bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModemLines(u32);

impl ModemLines {
    /// Data terminal ready
    pub const DTR: ModemLines = ModemLines(0x002);
    /// Request to send
    pub const RTS: ModemLines = ModemLines(0x004);
    /// Clear to send
    pub const CTS: ModemLines = ModemLines(0x020);
    /// Carrier detect
    pub const CAR: ModemLines = ModemLines(0x040);
    /// Ring indicator
    pub const RI: ModemLines = ModemLines(0x080);
    /// Data set ready
    pub const DSR: ModemLines = ModemLines(0x100);

    const ALL: [ModemLines; 6] = [
        Self::DTR,
        Self::RTS,
        Self::CTS,
        Self::CAR,
        Self::RI,
        Self::DSR,
    ];

    /// No lines asserted
    pub const fn empty() -> Self {
        ModemLines(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask from raw bits, dropping unknown ones
    pub fn from_bits_truncate(bits: u32) -> Self {
        let known = Self::ALL.iter().fold(0, |acc, line| acc | line.0);
        ModemLines(bits & known)
    }

    /// Whether every line in `other` is asserted
    pub const fn contains(self, other: ModemLines) -> bool {
        self.0 & other.0 == other.0
    }

    /// Assert the lines in `other`
    pub fn insert(&mut self, other: ModemLines) {
        self.0 |= other.0;
    }

    /// Whether no line is asserted
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[cfg(unix)]
    pub(crate) fn to_tiocm(self) -> libc::c_int {
        let mut bits = 0;
        for (line, tiocm) in Self::tiocm_table() {
            if self.contains(line) {
                bits |= tiocm;
            }
        }
        bits
    }

    #[cfg(unix)]
    pub(crate) fn from_tiocm(bits: libc::c_int) -> Self {
        let mut lines = ModemLines::empty();
        for (line, tiocm) in Self::tiocm_table() {
            if bits & tiocm != 0 {
                lines.insert(line);
            }
        }
        lines
    }

    #[cfg(unix)]
    fn tiocm_table() -> [(ModemLines, libc::c_int); 6] {
        [
            (Self::DTR, libc::TIOCM_DTR),
            (Self::RTS, libc::TIOCM_RTS),
            (Self::CTS, libc::TIOCM_CTS),
            (Self::CAR, libc::TIOCM_CAR),
            (Self::RI, libc::TIOCM_RI),
            (Self::DSR, libc::TIOCM_DSR),
        ]
    }
}

impl std::ops::BitOr for ModemLines {
    type Output = ModemLines;

    fn bitor(self, rhs: ModemLines) -> ModemLines {
        ModemLines(self.0 | rhs.0)
    }
}

impl fmt::Display for ModemLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::DTR, "DTR"),
            (Self::RTS, "RTS"),
            (Self::CTS, "CTS"),
            (Self::CAR, "CAR"),
            (Self::RI, "RI"),
            (Self::DSR, "DSR"),
        ];
        let mut first = true;
        for (line, name) in names {
            if self.contains(line) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}
