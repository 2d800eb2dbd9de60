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

//! Telnet wire constants (RFC 854)

/// Interpret As Command
pub const IAC: u8 = 0xFF;
/// Don't use option
pub const DONT: u8 = 0xFE;
/// Use option
pub const DO: u8 = 0xFD;
/// Won't use option
pub const WONT: u8 = 0xFC;
/// Will use option
pub const WILL: u8 = 0xFB;
/// Subnegotiation begin
pub const SB: u8 = 0xFA;
/// Break
pub const BRK: u8 = 0xF3;
/// No operation
pub const NOP: u8 = 0xF1;
/// Subnegotiation end
pub const SE: u8 = 0xF0;

/// Option codes
pub mod option {
    /// Binary Transmission [RFC856]
    pub const BINARY: u8 = 0;
    /// Echo [RFC857]
    pub const ECHO: u8 = 1;
    /// Suppress Go Ahead [RFC858]
    pub const SGA: u8 = 3;
}

/// Negotiation sent once per new connection before the peer is reported open:
/// WILL ECHO, WILL SUPPRESS-GO-AHEAD, WILL BINARY, DO BINARY.
pub const BOOTSTRAP: [u8; 12] = [
    IAC,
    WILL,
    option::ECHO,
    IAC,
    WILL,
    option::SGA,
    IAC,
    WILL,
    option::BINARY,
    IAC,
    DO,
    option::BINARY,
];
