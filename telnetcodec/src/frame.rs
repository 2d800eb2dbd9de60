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

use crate::TelnetOption;

///
/// Outbound Telnet frames understood by [`crate::TelnetNegotiator`]'s encoder.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TelnetFrame {
    /// Single data byte, IAC is doubled on the wire
    Data(u8),
    /// IAC BRK
    Break,
    /// IAC DO option
    Do(TelnetOption),
    /// IAC DONT option
    Dont(TelnetOption),
    /// IAC WILL option
    Will(TelnetOption),
    /// IAC WONT option
    Wont(TelnetOption),
}

impl TelnetFrame {
    /// Number of bytes this frame occupies once encoded.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            TelnetFrame::Data(byte) if *byte == crate::consts::IAC => 2,
            TelnetFrame::Data(_) => 1,
            TelnetFrame::Break => 2,
            TelnetFrame::Do(_)
            | TelnetFrame::Dont(_)
            | TelnetFrame::Will(_)
            | TelnetFrame::Wont(_) => 3,
        }
    }

    /// Frames are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}
