// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::too_many_lines)] // Scenario tests

//! Reader session integration tests
//!
//! Exercises readers against loopback interrogators: keepalive watchdog,
//! listener mode, end-to-end message flow through the registry and
//! partial-failure teardown.

mod common;

use common::{
    eventually, frame, free_port, init_logging, read_message, FakeInterrogator, FlakyStore,
    MockConnector, RecordingHandler, RecordingSink, WAIT,
};
use llrp_adaptor::{
    AdaptorHandle, ConnectionState, ErrorKind, LlrpCodec, Message, MessageCodec, MessageKind,
    ReaderConfig, Registry, RegistrySetup, DEFAULT_ADAPTOR,
};
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn registry_with(sink: Arc<RecordingSink>, handler: Arc<RecordingHandler>) -> Arc<Registry> {
    init_logging();
    let registry = Registry::new();
    assert!(registry.initialize(
        RegistrySetup::new(Arc::new(FlakyStore::default()), sink)
            .with_handler(handler)
            .commit_on_change(false)
    ));
    registry
}

#[test]
fn test_watchdog_drops_silent_reader_once() {
    let sink = Arc::new(RecordingSink::default());
    let registry = registry_with(sink.clone(), Arc::default());
    let interrogator = FakeInterrogator::bind();

    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(
            ReaderConfig::new("R1", "127.0.0.1")
                .port(interrogator.port())
                .keepalive(100, 2)
                .throw_on_timeout(true),
        )
        .unwrap();
    let mut peer = interrogator.accept();
    assert!(reader.is_connected());

    let spec = read_message(&mut peer);
    assert_eq!(spec.kind(), MessageKind::SET_READER_CONFIG);

    // No keepalive for longer than one 200 ms window
    thread::sleep(Duration::from_millis(250));
    assert!(eventually(WAIT, || reader.state() == ConnectionState::Disconnected));
    assert!(sink.wait_for(ErrorKind::ReaderLost, WAIT));

    // The closed socket must not produce a second report
    thread::sleep(Duration::from_millis(300));
    let lost: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.kind == ErrorKind::ReaderLost)
        .collect();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].reader, "R1");
    assert_eq!(lost[0].adaptor, DEFAULT_ADAPTOR);
}

/// Queue enough 1 MiB frames that the outbound pump blocks in a write.
fn stall_outbound(reader: &llrp_adaptor::Reader) {
    for id in 0..64 {
        reader
            .send(&frame(MessageKind::ADD_ROSPEC, id, vec![0; 1 << 20]))
            .unwrap();
    }
    thread::sleep(Duration::from_millis(200));
}

#[test]
fn test_disconnect_completes_while_peer_stops_reading() {
    let registry = registry_with(Arc::default(), Arc::default());
    let interrogator = FakeInterrogator::bind();
    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(ReaderConfig::new("R1", "127.0.0.1").port(interrogator.port()))
        .unwrap();
    let _peer = interrogator.accept();
    stall_outbound(&reader);

    let worker = Arc::clone(&reader);
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let _ = worker.disconnect();
        let _ = done_tx.send(());
    });
    assert!(done_rx.recv_timeout(WAIT).is_ok(), "disconnect hung");
    assert_eq!(reader.state(), ConnectionState::Disconnected);
}

#[test]
fn test_watchdog_fires_while_peer_stops_reading() {
    let sink = Arc::new(RecordingSink::default());
    let registry = registry_with(sink.clone(), Arc::default());
    let interrogator = FakeInterrogator::bind();
    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(
            ReaderConfig::new("R1", "127.0.0.1")
                .port(interrogator.port())
                .keepalive(300, 2),
        )
        .unwrap();
    let _peer = interrogator.accept();
    // Window of 600 ms closes while the pump is stuck
    stall_outbound(&reader);

    assert!(sink.wait_for(ErrorKind::ReaderLost, Duration::from_secs(3)));
    assert!(eventually(WAIT, || reader.state() == ConnectionState::Disconnected));
    assert_eq!(sink.count(ErrorKind::ReaderLost), 1);
}

#[test]
fn test_fresh_keepalives_keep_reader_connected() {
    let sink = Arc::new(RecordingSink::default());
    let handler = Arc::new(RecordingHandler::default());
    let registry = registry_with(sink.clone(), handler.clone());
    let interrogator = FakeInterrogator::bind();

    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(
            ReaderConfig::new("R1", "127.0.0.1")
                .port(interrogator.port())
                .keepalive(100, 2)
                .report_keepalive(true),
        )
        .unwrap();
    let mut peer = interrogator.accept();

    let start = Instant::now();
    let mut id = 1;
    while start.elapsed() < Duration::from_millis(700) {
        peer.write_all(&frame(MessageKind::KEEPALIVE, id, vec![]))
            .unwrap();
        id += 1;
        thread::sleep(Duration::from_millis(50));
    }

    assert!(reader.is_connected());
    assert_eq!(sink.count(ErrorKind::ReaderLost), 0);
    // Reported keepalives reach the handlers
    let seen = handler.wait_count(1, WAIT);
    assert!(seen
        .iter()
        .all(|(_, _, m)| m.kind() == MessageKind::KEEPALIVE));
    let written = u64::from(id - 1);
    assert!(eventually(WAIT, || reader.meta().packets_received == written));

    reader.disconnect().unwrap();
}

#[test]
fn test_listener_mode_accepts_interrogator() {
    let sink = Arc::new(RecordingSink::default());
    let handler = Arc::new(RecordingHandler::default());
    let registry = registry_with(sink.clone(), handler.clone());
    let port = free_port();

    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(
            ReaderConfig::new("R1", "")
                .port(port)
                .client_initiated(false),
        )
        .unwrap();
    assert!(reader.is_connected());

    let mut interrogator = TcpStream::connect(("127.0.0.1", port)).unwrap();
    interrogator.set_read_timeout(Some(WAIT)).unwrap();
    interrogator
        .write_all(&frame(MessageKind::READER_EVENT_NOTIFICATION, 1, vec![0xAB]))
        .unwrap();

    let seen = handler.wait_count(1, WAIT);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, "R1");
    assert_eq!(seen[0].2.kind(), MessageKind::READER_EVENT_NOTIFICATION);

    // No keepalive spec in listener mode; the first frame out is ours
    AdaptorHandle::send(
        &*adaptor,
        "R1",
        &frame(MessageKind::GET_READER_CAPABILITIES, 7, vec![]),
    )
    .unwrap();
    let first = read_message(&mut interrogator);
    assert_eq!(first.kind(), MessageKind::GET_READER_CAPABILITIES);
    assert_eq!(first.id(), 7);

    reader.disconnect().unwrap();
    assert_eq!(sink.count(ErrorKind::ReaderLost), 0);
}

#[test]
fn test_enqueue_reaches_interrogator_and_reports_flow_back() {
    let sink = Arc::new(RecordingSink::default());
    let handler = Arc::new(RecordingHandler::default());
    let registry = registry_with(sink.clone(), handler.clone());
    let interrogator = FakeInterrogator::bind();

    let adaptor = registry.adaptor(DEFAULT_ADAPTOR).unwrap();
    adaptor
        .define_reader(
            &ReaderConfig::new("R1", "127.0.0.1")
                .port(interrogator.port())
                .keepalive(10_000, 3),
        )
        .unwrap();
    let mut peer = interrogator.accept();

    for id in 100..103 {
        registry
            .enqueue_message(
                DEFAULT_ADAPTOR,
                "R1",
                Message::new(MessageKind::ADD_ROSPEC, id, vec![0, 1]),
            )
            .unwrap();
    }

    assert_eq!(read_message(&mut peer).kind(), MessageKind::SET_READER_CONFIG);
    let ids: Vec<u32> = (0..3).map(|_| read_message(&mut peer).id()).collect();
    assert_eq!(ids, vec![100, 101, 102]);

    peer.write_all(&frame(MessageKind::RO_ACCESS_REPORT, 9, vec![0xEE]))
        .unwrap();
    let seen = handler.wait_count(1, WAIT);
    assert_eq!(seen[0].0, DEFAULT_ADAPTOR);
    assert_eq!(seen[0].2.body(), &[0xEE]);

    assert!(eventually(WAIT, || {
        let meta = adaptor.reader_meta("R1").unwrap();
        meta.session_packets_sent == 4 && meta.session_packets_received == 1
    }));
    assert!(sink.events().is_empty());
}

#[test]
fn test_undecodable_send_reported_and_dropped() {
    let sink = Arc::new(RecordingSink::default());
    let registry = registry_with(sink.clone(), Arc::default());
    let interrogator = FakeInterrogator::bind();

    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(ReaderConfig::new("R1", "127.0.0.1").port(interrogator.port()))
        .unwrap();
    let _peer = interrogator.accept();

    let mut bad = frame(MessageKind::ADD_ROSPEC, 1, vec![1, 2, 3]);
    bad.truncate(8);
    let err = reader.send(&bad).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MsgSyntaxError);
    assert_eq!(sink.count(ErrorKind::MsgSyntaxError), 1);
    assert_eq!(reader.pending_outbound(), 0);
}

#[test]
fn test_peer_close_reports_reader_lost() {
    let sink = Arc::new(RecordingSink::default());
    let registry = registry_with(sink.clone(), Arc::default());
    let interrogator = FakeInterrogator::bind();

    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(ReaderConfig::new("R1", "127.0.0.1").port(interrogator.port()))
        .unwrap();
    let peer = interrogator.accept();
    drop(peer);

    assert!(sink.wait_for(ErrorKind::ReaderLost, WAIT));
    assert!(eventually(WAIT, || !reader.is_connected()));

    // A reconnect opens a fresh session with fresh counters
    reader.reconnect().unwrap();
    let _peer = interrogator.accept();
    assert!(reader.is_connected());
    assert_eq!(reader.meta().session_packets_received, 0);
    reader.disconnect().unwrap();
}

#[test]
fn test_updated_settings_apply_on_reconnect() {
    let sink = Arc::new(RecordingSink::default());
    let registry = registry_with(sink.clone(), Arc::default());
    let interrogator = FakeInterrogator::bind();

    let adaptor = registry.adaptor(DEFAULT_ADAPTOR).unwrap();
    let config = ReaderConfig::new("R1", "127.0.0.1").port(interrogator.port());
    adaptor.define_reader(&config).unwrap();
    let _first = interrogator.accept();

    adaptor
        .update_reader(&config.clone().keepalive(2_500, 5).report_keepalive(true))
        .unwrap();
    // Settings of another reader are rejected
    let err = adaptor
        .update_reader(&ReaderConfig::new("R9", "127.0.0.1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReaderNotExist);

    adaptor.reconnect_reader("R1").unwrap();
    let _second = interrogator.accept();
    let meta = adaptor.reader_meta("R1").unwrap();
    assert!(meta.connected);
    assert_eq!(meta.keepalive_period_ms, 2_500);
    assert_eq!(meta.allowed_keepalive_misses, 5);
    assert!(meta.report_keepalive);
    assert_eq!(sink.count(ErrorKind::ReaderLost), 0);
}

#[test]
fn test_meta_snapshot_isolated_from_live_counters() {
    let registry = registry_with(Arc::default(), Arc::default());
    let interrogator = FakeInterrogator::bind();
    let adaptor = registry.local_adaptor(DEFAULT_ADAPTOR).unwrap();
    let reader = adaptor
        .define_with(ReaderConfig::new("R1", "127.0.0.1").port(interrogator.port()))
        .unwrap();
    let mut peer = interrogator.accept();

    let mut snapshot = reader.meta();
    snapshot.packets_received = 1_000;
    snapshot.connected = false;

    peer.write_all(&frame(MessageKind::RO_ACCESS_REPORT, 1, vec![]))
        .unwrap();
    assert!(eventually(WAIT, || reader.meta().packets_received == 1));
    let live = reader.meta();
    assert!(live.connected);
    assert_eq!(live.packets_received, 1);
}

#[test]
fn test_undefine_all_continues_past_failing_reader() {
    init_logging();
    let sink = Arc::new(RecordingSink::default());
    let connector = Arc::new(MockConnector::failing_close_for(&["host-2"]));
    let registry = Registry::new();
    assert!(registry.initialize(
        RegistrySetup::new(Arc::new(FlakyStore::default()), sink.clone())
            .with_connector(connector.clone())
    ));

    let adaptor = registry.adaptor(DEFAULT_ADAPTOR).unwrap();
    for i in 1..=3 {
        adaptor
            .define_reader(&ReaderConfig::new(format!("R{}", i), format!("host-{}", i)))
            .unwrap();
    }
    assert!(eventually(WAIT, || connector.written().len() == 3));

    adaptor.undefine_all_readers().unwrap();

    assert!(adaptor.reader_names().unwrap().is_empty());
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ErrorKind::ReaderLost);
    assert_eq!(events[0].reader, "R2");

    // Every session wrote its keepalive spec first
    let codec = LlrpCodec::default();
    for (_, bytes) in connector.written() {
        assert_eq!(
            codec.decode(&bytes).unwrap().kind(),
            MessageKind::SET_READER_CONFIG
        );
    }
}
