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

//! Helpers shared by the integration suites

#![allow(dead_code)]

use chario::{Chardev, ChardevEvent, Frontend, UNBOUNDED_CAPACITY};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, timeout};

/// How long any single wait in a test may take
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Events from several recorders in arrival order, tagged with the recorder
pub type Journal = Arc<Mutex<Vec<(usize, ChardevEvent)>>>;

/// Frontend that records everything it is given
#[derive(Debug)]
pub struct Recorder {
    capacity: AtomicUsize,
    last_offer: AtomicUsize,
    overrun: AtomicBool,
    receive_calls: AtomicUsize,
    data: Mutex<Vec<u8>>,
    events: Mutex<Vec<ChardevEvent>>,
    journal: Option<(usize, Journal)>,
}

impl Recorder {
    pub fn new() -> Arc<Recorder> {
        Recorder::with_capacity(UNBOUNDED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Recorder> {
        Arc::new(Recorder::build(capacity, None))
    }

    /// Recorder that also appends its events to `journal` as `(tag, event)`
    pub fn journaled(tag: usize, journal: &Journal) -> Arc<Recorder> {
        Arc::new(Recorder::build(UNBOUNDED_CAPACITY, Some((tag, journal.clone()))))
    }

    fn build(capacity: usize, journal: Option<(usize, Journal)>) -> Recorder {
        Recorder {
            capacity: AtomicUsize::new(capacity),
            last_offer: AtomicUsize::new(0),
            overrun: AtomicBool::new(false),
            receive_calls: AtomicUsize::new(0),
            data: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            journal,
        }
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    pub fn data(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn take_data(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock().unwrap())
    }

    pub fn events(&self) -> Vec<ChardevEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn count(&self, event: ChardevEvent) -> usize {
        self.events().iter().filter(|seen| **seen == event).count()
    }

    /// Whether `receive` was ever handed more than the preceding `can_receive`
    pub fn overran(&self) -> bool {
        self.overrun.load(Ordering::SeqCst)
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }
}

impl Frontend for Recorder {
    fn can_receive(&self) -> usize {
        let capacity = self.capacity.load(Ordering::SeqCst);
        self.last_offer.store(capacity, Ordering::SeqCst);
        capacity
    }

    fn receive(&self, data: &[u8]) {
        if data.len() > self.last_offer.load(Ordering::SeqCst) {
            self.overrun.store(true, Ordering::SeqCst);
        }
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        self.data.lock().unwrap().extend_from_slice(data);
    }

    fn event(&self, event: ChardevEvent) {
        self.events.lock().unwrap().push(event);
        if let Some((tag, ref journal)) = self.journal {
            journal.lock().unwrap().push((tag, event));
        }
    }
}

/// Poll `condition` until it holds, failing the test after [`DEADLINE`]
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + DEADLINE;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for the chardev's open state to become `open`
pub async fn wait_open(chr: &Chardev, open: bool) {
    let mut state = chr.open_state();
    timeout(DEADLINE, state.wait_for(|now| *now == open))
        .await
        .expect("open state did not change in time")
        .expect("chardev dropped");
}
