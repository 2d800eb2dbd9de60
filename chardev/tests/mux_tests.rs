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

//! Multiplexer command handling, focus and buffering

use chario::{
    BackendKind, BackendOptions, Chardev, ChardevError, ChardevEvent, ChardevOptions,
    ChardevRegistry, MuxConfig, MuxHooks, SocketOptions, help_text,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

mod common;
use common::{DEADLINE, Journal, Recorder, eventually, wait_open};

/// Mux over a listening socket with one peer already connected
async fn mux_over_socket(label: &str, config: MuxConfig, hooks: MuxHooks) -> (Chardev, TcpStream) {
    let base = Chardev::open(ChardevOptions::new(
        format!("{label}-base"),
        BackendOptions::Socket(SocketOptions::tcp("127.0.0.1", 0).with_server(true)),
    ))
    .await
    .unwrap();
    let peer = TcpStream::connect(base.local_addr().unwrap()).await.unwrap();
    wait_open(&base, true).await;
    let mux = Chardev::open_mux(label, base, config, hooks, true).unwrap();
    (mux, peer)
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(DEADLINE, stream.read_exact(&mut buf))
        .await
        .expect("peer read timed out")
        .unwrap();
    buf
}

#[tokio::test]
async fn test_attach_moves_focus_to_newest() {
    let (mux, _peer) = mux_over_socket("mux0", MuxConfig::default(), MuxHooks::new()).await;
    let first = Recorder::new();
    let second = Recorder::new();

    assert_eq!(mux.attach(first.clone()).unwrap(), 0);
    assert_eq!(
        first.events(),
        vec![ChardevEvent::MuxIn, ChardevEvent::Opened]
    );
    assert_eq!(mux.attach(second.clone()).unwrap(), 1);
    assert_eq!(mux.mux_focus(), Some(1));
    assert_eq!(
        first.events(),
        vec![ChardevEvent::MuxIn, ChardevEvent::Opened, ChardevEvent::MuxOut]
    );
    assert_eq!(
        second.events(),
        vec![ChardevEvent::MuxIn, ChardevEvent::Opened]
    );
    assert_eq!(mux.kind(), BackendKind::Mux);
    assert_eq!(mux.filename(), "mux:mux0-base");
}

#[tokio::test]
async fn test_escape_c_switches_focus() {
    let (mux, mut peer) = mux_over_socket("mux1", MuxConfig::default(), MuxHooks::new()).await;
    let journal = Journal::default();
    let first = Recorder::journaled(0, &journal);
    let second = Recorder::journaled(1, &journal);
    mux.attach(first.clone()).unwrap();
    mux.attach(second.clone()).unwrap();
    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            (0, ChardevEvent::MuxIn),
            (0, ChardevEvent::Opened),
            (0, ChardevEvent::MuxOut),
            (1, ChardevEvent::MuxIn),
            (1, ChardevEvent::Opened),
        ]
    );
    journal.lock().unwrap().clear();

    peer.write_all(&[0x01, b'c']).await.unwrap();
    eventually("focus on first", || first.count(ChardevEvent::MuxIn) == 2).await;
    assert_eq!(mux.mux_focus(), Some(0));
    assert_eq!(
        std::mem::take(&mut *journal.lock().unwrap()),
        vec![(1, ChardevEvent::MuxOut), (0, ChardevEvent::MuxIn)]
    );

    peer.write_all(&[0x01, b'c']).await.unwrap();
    eventually("focus on second", || second.count(ChardevEvent::MuxIn) == 2).await;
    assert_eq!(mux.mux_focus(), Some(1));
    assert_eq!(
        *journal.lock().unwrap(),
        vec![(0, ChardevEvent::MuxOut), (1, ChardevEvent::MuxIn)]
    );

    peer.write_all(b"data").await.unwrap();
    eventually("data on second", || second.data() == b"data").await;
    assert!(first.data().is_empty());
}

#[tokio::test]
async fn test_focus_cycle_returns_to_start() {
    let (mux, mut peer) = mux_over_socket("mux2", MuxConfig::default(), MuxHooks::new()).await;
    let frontends: Vec<Arc<Recorder>> = (0..3).map(|_| Recorder::new()).collect();
    for frontend in &frontends {
        mux.attach(frontend.clone()).unwrap();
    }
    for frontend in &frontends {
        frontend.clear_events();
    }
    let start = mux.mux_focus();

    peer.write_all(&[0x01, b'c', 0x01, b'c', 0x01, b'c']).await.unwrap();
    eventually("three switches", || {
        frontends
            .iter()
            .map(|frontend| frontend.count(ChardevEvent::MuxIn))
            .sum::<usize>()
            == 3
    })
    .await;
    assert_eq!(mux.mux_focus(), start);
    for frontend in &frontends {
        assert_eq!(frontend.count(ChardevEvent::MuxIn), 1);
        assert_eq!(frontend.count(ChardevEvent::MuxOut), 1);
    }
}

#[tokio::test]
async fn test_ceiling_refuses_attach() {
    let config = MuxConfig::default().with_max_frontends(2);
    let (mux, _peer) = mux_over_socket("mux3", config, MuxHooks::new()).await;
    mux.attach(Recorder::new()).unwrap();
    mux.attach(Recorder::new()).unwrap();
    let third = Recorder::new();
    assert!(matches!(
        mux.attach(third.clone()),
        Err(ChardevError::MuxFull(2))
    ));
    assert!(third.events().is_empty());
    assert_eq!(mux.mux_focus(), Some(1));
}

#[tokio::test]
async fn test_doubled_escape_sends_literal() {
    let (mux, mut peer) = mux_over_socket("mux4", MuxConfig::default(), MuxHooks::new()).await;
    let frontend = Recorder::new();
    mux.attach(frontend.clone()).unwrap();

    peer.write_all(&[b'a', 0x01, 0x01, b'b']).await.unwrap();
    eventually("literal escape", || frontend.data() == [b'a', 0x01, b'b']).await;
}

#[tokio::test]
async fn test_custom_escape_byte() {
    let config = MuxConfig::default().with_escape(b'~');
    let (mux, mut peer) = mux_over_socket("mux5", config, MuxHooks::new()).await;
    let frontend = Recorder::new();
    mux.attach(frontend.clone()).unwrap();

    peer.write_all(b"x\x01y~~z").await.unwrap();
    eventually("custom escape", || frontend.data() == b"x\x01y~z").await;
}

#[tokio::test]
async fn test_break_goes_to_focused_frontend() {
    let (mux, mut peer) = mux_over_socket("mux6", MuxConfig::default(), MuxHooks::new()).await;
    let first = Recorder::new();
    let second = Recorder::new();
    mux.attach(first.clone()).unwrap();
    mux.attach(second.clone()).unwrap();

    peer.write_all(&[0x01, b'b']).await.unwrap();
    eventually("break", || second.count(ChardevEvent::Break) == 1).await;
    assert_eq!(first.count(ChardevEvent::Break), 0);
}

#[tokio::test]
async fn test_help_is_written_to_backend() {
    let (mux, mut peer) = mux_over_socket("mux7", MuxConfig::default(), MuxHooks::new()).await;
    mux.attach(Recorder::new()).unwrap();

    peer.write_all(&[0x01, b'h']).await.unwrap();
    let expected = help_text(0x01);
    let text = read_exactly(&mut peer, expected.len()).await;
    assert_eq!(String::from_utf8(text).unwrap(), expected);
}

#[tokio::test]
async fn test_exit_and_flush_hooks() {
    let exited = Arc::new(AtomicBool::new(false));
    let flushed = Arc::new(AtomicUsize::new(0));
    let hooks = {
        let exited = exited.clone();
        let flushed = flushed.clone();
        MuxHooks::new()
            .with_exit(move || exited.store(true, Ordering::SeqCst))
            .with_flush(move || {
                flushed.fetch_add(1, Ordering::SeqCst);
            })
    };
    let (mux, mut peer) = mux_over_socket("mux8", MuxConfig::default(), hooks).await;
    mux.attach(Recorder::new()).unwrap();

    peer.write_all(&[0x01, b's']).await.unwrap();
    eventually("flush hook", || flushed.load(Ordering::SeqCst) == 1).await;

    peer.write_all(&[0x01, b'x']).await.unwrap();
    assert_eq!(
        read_exactly(&mut peer, 20).await,
        b"chario: Terminated\n\r"
    );
    eventually("exit hook", || exited.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn test_timestamps_prefix_following_lines() {
    let (mux, mut peer) = mux_over_socket("mux9", MuxConfig::default(), MuxHooks::new()).await;
    mux.attach(Recorder::new()).unwrap();

    peer.write_all(&[0x01, b't']).await.unwrap();
    eventually("timestamps on", || mux.mux_timestamps()).await;

    mux.write_all(b"one\ntwo\n").await.unwrap();
    let out = String::from_utf8(read_exactly(&mut peer, 4 + 15 + 4).await).unwrap();
    assert!(out.starts_with("one\n[00:00:0"), "{out:?}");
    assert!(out.ends_with("] two\n"), "{out:?}");

    peer.write_all(&[0x01, b't']).await.unwrap();
    eventually("timestamps off", || !mux.mux_timestamps()).await;
    mux.write_all(b"three\n").await.unwrap();
    assert_eq!(read_exactly(&mut peer, 6).await, b"three\n");
}

#[tokio::test]
async fn test_slow_frontend_is_buffered_in_order() {
    let (mux, mut peer) = mux_over_socket("mux10", MuxConfig::default(), MuxHooks::new()).await;
    let frontend = Recorder::with_capacity(0);
    mux.attach(frontend.clone()).unwrap();

    let payload: Vec<u8> = (b'A'..=b'Z').chain(b'a'..=b'n').collect();
    peer.write_all(&payload).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(frontend.receive_calls(), 0);

    frontend.set_capacity(100);
    mux.accept_input();
    eventually("buffered input", || frontend.data() == payload).await;
    assert!(!frontend.overran());
}

#[tokio::test]
async fn test_underlying_close_reaches_every_frontend() {
    let (mux, peer) = mux_over_socket("mux11", MuxConfig::default(), MuxHooks::new()).await;
    let first = Recorder::new();
    let second = Recorder::new();
    mux.attach(first.clone()).unwrap();
    mux.attach(second.clone()).unwrap();

    drop(peer);
    wait_open(&mux, false).await;
    eventually("closed everywhere", || {
        first.count(ChardevEvent::Closed) == 1 && second.count(ChardevEvent::Closed) == 1
    })
    .await;
}

#[tokio::test]
async fn test_close_reaches_every_frontend_once() {
    let (mux, mut peer) = mux_over_socket("mux13", MuxConfig::default(), MuxHooks::new()).await;
    let first = Recorder::new();
    let second = Recorder::new();
    mux.attach(first.clone()).unwrap();
    mux.attach(second.clone()).unwrap();
    let base = mux.underlying().unwrap().clone();

    mux.close();
    assert_eq!(first.count(ChardevEvent::Closed), 1);
    assert_eq!(second.count(ChardevEvent::Closed), 1);
    assert!(base.is_closed());
    assert!(!mux.is_open());
    assert_eq!(mux.mux_focus(), None);

    let mut buf = [0u8; 1];
    let read = timeout(DEADLINE, peer.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(read, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(first.count(ChardevEvent::Closed), 1);
    assert_eq!(second.count(ChardevEvent::Closed), 1);
}

#[tokio::test]
async fn test_close_over_ringbuf_reaches_every_frontend() {
    let base = Chardev::open(ChardevOptions::new(
        "mux14-base",
        BackendOptions::Ringbuf { size: 64 },
    ))
    .await
    .unwrap();
    let mux = Chardev::open_mux("mux14", base, MuxConfig::default(), MuxHooks::new(), true).unwrap();
    let first = Recorder::new();
    let second = Recorder::new();
    mux.attach(first.clone()).unwrap();
    mux.attach(second.clone()).unwrap();

    mux.close();
    assert_eq!(
        first.events(),
        vec![
            ChardevEvent::MuxIn,
            ChardevEvent::Opened,
            ChardevEvent::MuxOut,
            ChardevEvent::Closed
        ]
    );
    assert_eq!(
        second.events(),
        vec![ChardevEvent::MuxIn, ChardevEvent::Opened, ChardevEvent::Closed]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_all_waits_for_slow_peer() {
    const TOTAL: usize = 16 * 1024 * 1024;
    let (mux, mut peer) = mux_over_socket("mux15", MuxConfig::default(), MuxHooks::new()).await;
    let reader = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut buf = vec![0u8; 64 * 1024];
        let mut seen = 0;
        while seen < TOTAL {
            match peer.read(&mut buf).await.unwrap() {
                0 => break,
                len => seen += len,
            }
        }
        seen
    });

    let payload = vec![b'z'; TOTAL];
    let written = timeout(Duration::from_secs(30), mux.write_all(&payload))
        .await
        .expect("write_all through the mux stalled")
        .unwrap();
    assert_eq!(written, TOTAL);
    assert_eq!(timeout(DEADLINE, reader).await.unwrap().unwrap(), TOTAL);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timestamps_survive_backpressure() {
    const LINES: usize = 150_000;
    const LINE: usize = 64;
    const PREFIX: usize = 15;
    let (mux, mut peer) = mux_over_socket("mux16", MuxConfig::default(), MuxHooks::new()).await;
    mux.attach(Recorder::new()).unwrap();
    peer.write_all(&[0x01, b't']).await.unwrap();
    eventually("timestamps on", || mux.mux_timestamps()).await;

    let expected = LINES * LINE + (LINES - 1) * PREFIX;
    let reader = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut out = vec![0u8; expected];
        peer.read_exact(&mut out).await.unwrap();
        out
    });

    let mut line = vec![b'x'; LINE - 1];
    line.push(b'\n');
    let payload = line.repeat(LINES);
    timeout(Duration::from_secs(30), mux.write_all(&payload))
        .await
        .expect("timestamped write stalled")
        .unwrap();

    let out = timeout(Duration::from_secs(30), reader).await.unwrap().unwrap();
    let text = String::from_utf8(out).unwrap();
    let mut lines = text.split_terminator('\n');
    assert_eq!(lines.next().unwrap(), "x".repeat(LINE - 1));
    for stamped in lines {
        let (prefix, body) = stamped.split_at(PREFIX);
        assert!(prefix.starts_with('[') && prefix.ends_with("] "), "{prefix:?}");
        assert_eq!(body.len(), LINE - 1);
        assert!(body.bytes().all(|byte| byte == b'x'));
    }
}

#[tokio::test]
async fn test_detach_then_reattach() {
    let (mux, mut peer) = mux_over_socket("mux12", MuxConfig::default(), MuxHooks::new()).await;
    mux.attach(Recorder::new()).unwrap();
    mux.attach(Recorder::new()).unwrap();
    mux.detach();
    assert_eq!(mux.mux_focus(), None);

    let frontend = Recorder::new();
    assert_eq!(mux.attach(frontend.clone()).unwrap(), 0);
    peer.write_all(b"fresh").await.unwrap();
    eventually("input after reattach", || frontend.data() == b"fresh").await;
}

#[tokio::test]
async fn test_registry_mux_over_ringbuf() {
    let registry = ChardevRegistry::new();
    let mux = registry.create_from_str("ringbuf,id=con,size=64,mux=on").await.unwrap();
    assert_eq!(mux.kind(), BackendKind::Mux);
    assert_eq!(mux.filename(), "mux:con-base");
    let base = registry.find("con-base").unwrap();
    assert_eq!(base.kind(), BackendKind::Ringbuf);
    assert_eq!(registry.len(), 2);

    mux.write_all(b"console").await.unwrap();
    assert_eq!(registry.ringbuf_read("con-base", 64).unwrap(), b"console");

    let frontend = Recorder::new();
    mux.attach(frontend.clone()).unwrap();
    assert!(matches!(
        registry.remove("con"),
        Err(ChardevError::FrontendAttached(_))
    ));
    mux.detach();
    registry.remove("con").unwrap();
    assert!(registry.is_empty());
    assert!(base.is_closed());
}
