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

use bytes::Bytes;

///
/// `TelnetEvent` is what survives of an inbound stream after option sequences are stripped.
/// Events are produced in stream order: a `Break` between two data runs splits them.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetEvent {
    /// Run of payload bytes, escaped IACs already collapsed
    Data(Bytes),
    /// Peer sent IAC BRK
    Break,
}
