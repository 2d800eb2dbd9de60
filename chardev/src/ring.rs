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

use crate::{ChardevError, Result};

/// Fixed capacity circular byte store
///
/// Producer and consumer cursors only move forward. When a write finds the
/// store full the consumer cursor is pushed ahead, dropping the oldest unread
/// byte, so a reader always sees the most recent `capacity` bytes in order.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Box<[u8]>,
    prod: usize,
    cons: usize,
}

impl RingBuffer {
    /// Create a ring of `capacity` bytes; `capacity` must be a power of two
    pub fn new(capacity: usize) -> Result<RingBuffer> {
        if !capacity.is_power_of_two() {
            return Err(ChardevError::config(
                "size",
                format!("ring buffer size {capacity} must be a power of two"),
            ));
        }
        Ok(RingBuffer {
            data: vec![0; capacity].into_boxed_slice(),
            prod: 0,
            cons: 0,
        })
    }

    /// Total number of bytes the ring can hold
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes waiting to be read
    pub fn len(&self) -> usize {
        self.prod.wrapping_sub(self.cons)
    }

    /// No bytes waiting
    pub fn is_empty(&self) -> bool {
        self.prod == self.cons
    }

    /// Next push will evict
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    fn mask(&self) -> usize {
        self.data.len() - 1
    }

    /// Append one byte, returning `true` when an unread byte was evicted
    pub fn push(&mut self, byte: u8) -> bool {
        let slot = self.prod & self.mask();
        self.data[slot] = byte;
        self.prod = self.prod.wrapping_add(1);
        if self.len() > self.capacity() {
            self.cons = self.prod.wrapping_sub(self.capacity());
            true
        } else {
            false
        }
    }

    /// Append `bytes`, returning how many unread bytes were evicted
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().filter(|byte| self.push(**byte)).count()
    }

    /// Take the oldest byte
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.data[self.cons & self.mask()];
        self.cons = self.cons.wrapping_add(1);
        Some(byte)
    }

    /// Take up to `max` bytes, oldest first
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        let count = max.min(self.len());
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(byte) = self.pop() {
                out.push(byte);
            }
        }
        out
    }

    /// Copy into `buf` without allocating, returning the count
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        while count < buf.len() {
            match self.pop() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Drop all unread bytes
    pub fn clear(&mut self) {
        self.cons = self.prod;
    }
}
