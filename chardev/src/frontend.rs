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

//! Frontend callback contract

use crate::ChardevEvent;

/// Consumer attached to a chardev
///
/// Implement this trait for device models or consoles that read from a chardev.
/// Callbacks run on the runtime's worker threads and never while the chardev holds
/// any of its own locks, so a frontend may call back into the chardev (for example
/// to `write` an echo) from any of them.
///
/// # Example
///
/// ```no_run
/// use chario::{ChardevEvent, Frontend};
/// use std::sync::Mutex;
///
/// struct Uart {
///     fifo: Mutex<Vec<u8>>,
/// }
///
/// impl Frontend for Uart {
///     fn can_receive(&self) -> usize {
///         16 - self.fifo.lock().unwrap().len()
///     }
///
///     fn receive(&self, data: &[u8]) {
///         self.fifo.lock().unwrap().extend_from_slice(data);
///     }
///
///     fn event(&self, event: ChardevEvent) {
///         println!("uart: {event}");
///     }
/// }
/// ```
pub trait Frontend: Send + Sync + 'static {
    /// Number of bytes the frontend can take right now; 0 pauses input
    fn can_receive(&self) -> usize;

    /// Deliver bytes. Never called with more than the last `can_receive` returned.
    fn receive(&self, data: &[u8]);

    /// Lifecycle notification
    fn event(&self, _event: ChardevEvent) {}
}

/// Frontend built from closures
///
/// # Example
///
/// ```
/// use chario::CallbackFrontend;
///
/// let frontend = CallbackFrontend {
///     on_receive: Some(Box::new(|data| println!("{} bytes", data.len()))),
///     ..Default::default()
/// };
/// ```
pub struct CallbackFrontend {
    /// Capacity query, accepts everything when unset
    pub can_receive: Option<Box<dyn Fn() -> usize + Send + Sync + 'static>>,
    /// Data sink
    pub on_receive: Option<Box<dyn Fn(&[u8]) + Send + Sync + 'static>>,
    /// Event sink
    pub on_event: Option<Box<dyn Fn(ChardevEvent) + Send + Sync + 'static>>,
}

/// Capacity reported by a [`CallbackFrontend`] without a `can_receive` closure
pub const UNBOUNDED_CAPACITY: usize = 4096;

impl Default for CallbackFrontend {
    fn default() -> Self {
        Self {
            can_receive: None,
            on_receive: None,
            on_event: None,
        }
    }
}

impl Frontend for CallbackFrontend {
    fn can_receive(&self) -> usize {
        match self.can_receive {
            Some(ref f) => f(),
            None => UNBOUNDED_CAPACITY,
        }
    }

    fn receive(&self, data: &[u8]) {
        if let Some(ref f) = self.on_receive {
            f(data);
        }
    }

    fn event(&self, event: ChardevEvent) {
        if let Some(ref f) = self.on_event {
            f(event);
        }
    }
}

impl std::fmt::Debug for CallbackFrontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackFrontend")
            .field("can_receive", &self.can_receive.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}
