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

//! In-memory ring buffer backend

use crate::ring::RingBuffer;
use crate::{ChardevError, Result};
use parking_lot::Mutex;

pub(crate) struct RingbufBackend {
    ring: Mutex<RingBuffer>,
}

impl RingbufBackend {
    pub(crate) fn new(size: usize) -> Result<Self> {
        Ok(Self {
            ring: Mutex::new(RingBuffer::new(size)?),
        })
    }

    /// Store `buf`, overwriting the oldest bytes once full; always takes everything
    pub(crate) fn write(&self, buf: &[u8]) -> usize {
        self.ring.lock().write(buf);
        buf.len()
    }

    pub(crate) fn read(&self, max: usize) -> Result<Vec<u8>> {
        if max == 0 {
            return Err(ChardevError::InvalidArgument(
                "size must be greater than zero".into(),
            ));
        }
        Ok(self.ring.lock().read(max))
    }

    pub(crate) fn count(&self) -> usize {
        self.ring.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }
}
