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

//! Ring buffer chardev and null chardev behaviour

use chario::{
    BackendKind, BackendOptions, Chardev, ChardevError, ChardevEvent, ChardevOptions, RingBuffer,
    WatchCondition,
};
use proptest::prelude::*;

mod common;
use common::Recorder;

async fn ringbuf(label: &str, size: usize) -> Chardev {
    Chardev::open(ChardevOptions::new(label, BackendOptions::Ringbuf { size }))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_overflow_keeps_most_recent_bytes() {
    let chr = ringbuf("ring0", 8).await;
    assert_eq!(chr.write(b"ABCDEFGHIJ").unwrap(), 10);
    assert_eq!(chr.ringbuf_count().unwrap(), 8);
    assert_eq!(chr.ringbuf_read(100).unwrap(), b"CDEFGHIJ");
    assert_eq!(chr.ringbuf_count().unwrap(), 0);
}

#[tokio::test]
async fn test_partial_reads_are_ordered() {
    let chr = ringbuf("ring1", 16).await;
    chr.write_all(b"hello ").await.unwrap();
    chr.ringbuf_write(b"world").unwrap();
    assert_eq!(chr.ringbuf_read(5).unwrap(), b"hello");
    assert_eq!(chr.ringbuf_read(100).unwrap(), b" world");
    assert!(chr.ringbuf_read(100).unwrap().is_empty());
}

#[tokio::test]
async fn test_zero_sized_read_rejected() {
    let chr = ringbuf("ring2", 8).await;
    assert!(matches!(
        chr.ringbuf_read(0),
        Err(ChardevError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_size_must_be_power_of_two() {
    let err = Chardev::open(ChardevOptions::new(
        "ring3",
        BackendOptions::Ringbuf { size: 100 },
    ))
    .await
    .unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("power of two"));
}

#[tokio::test]
async fn test_ringbuf_is_open_and_has_no_reader() {
    let chr = ringbuf("ring4", 8).await;
    assert!(chr.is_open());
    assert_eq!(chr.kind(), BackendKind::Ringbuf);
    assert_eq!(chr.filename(), "ringbuf:8");

    let mut buf = [0u8; 4];
    assert!(matches!(
        chr.read_sync(&mut buf).await,
        Err(ChardevError::NotSupported {
            kind: BackendKind::Ringbuf,
            operation: "read_sync"
        })
    ));
    assert!(chr.add_watch(WatchCondition::Out, || {}).is_none());
}

#[tokio::test]
async fn test_ringbuf_helpers_reject_other_kinds() {
    let chr = Chardev::open(ChardevOptions::new("null0", BackendOptions::Null))
        .await
        .unwrap();
    assert!(chr.ringbuf_write(b"x").is_err());
    assert!(chr.ringbuf_read(1).is_err());
    assert_eq!(chr.write(b"discarded").unwrap(), 9);
    assert_eq!(chr.filename(), "null");
}

#[tokio::test]
async fn test_attach_reports_open_then_close_reports_closed() {
    let chr = ringbuf("ring5", 8).await;
    let frontend = Recorder::new();
    assert_eq!(chr.attach(frontend.clone()).unwrap(), 0);
    assert!(chr.is_frontend_open());
    assert_eq!(frontend.events(), vec![ChardevEvent::Opened]);

    assert!(matches!(
        chr.attach(Recorder::new()),
        Err(ChardevError::FrontendAttached(_))
    ));

    chr.close();
    chr.close();
    assert!(chr.is_closed());
    assert!(!chr.is_open());
    assert_eq!(
        frontend.events(),
        vec![ChardevEvent::Opened, ChardevEvent::Closed]
    );
    assert!(matches!(chr.write(b"late"), Err(ChardevError::Closed(_))));
}

#[tokio::test]
async fn test_detach_allows_new_frontend() {
    let chr = ringbuf("ring6", 8).await;
    chr.attach(Recorder::new()).unwrap();
    chr.detach();
    assert!(!chr.is_frontend_open());
    chr.attach(Recorder::new()).unwrap();
}

#[tokio::test]
async fn test_print_formats_output() {
    let chr = ringbuf("ring7", 64).await;
    let written = chr.print(format_args!("{}-{:02}", "tick", 7)).await.unwrap();
    assert_eq!(written, 7);
    assert_eq!(chr.ringbuf_read(64).unwrap(), b"tick-07");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_never_interleave() {
    const BLOCK: usize = 64;
    const ROUNDS: usize = 16;
    let chr = ringbuf("ring8", 8192).await;

    std::thread::scope(|scope| {
        for id in 0..4u8 {
            let chr = chr.clone();
            scope.spawn(move || {
                let block = [b'a' + id; BLOCK];
                for _ in 0..ROUNDS {
                    assert_eq!(chr.write(&block).unwrap(), BLOCK);
                }
            });
        }
    });

    let out = chr.ringbuf_read(8192).unwrap();
    assert_eq!(out.len(), 4 * BLOCK * ROUNDS);
    for chunk in out.chunks(BLOCK) {
        assert!(chunk.iter().all(|byte| *byte == chunk[0]));
    }
}

proptest! {
    #[test]
    fn prop_ring_keeps_last_capacity_bytes(
        shift in 0u32..8,
        data in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let capacity = 1usize << shift;
        let mut ring = RingBuffer::new(capacity).unwrap();
        let evicted = ring.write(&data);
        let kept = data.len().min(capacity);
        prop_assert_eq!(evicted, data.len() - kept);
        prop_assert_eq!(ring.read(usize::MAX), data[data.len() - kept..].to_vec());
        prop_assert!(ring.is_empty());
    }
}
