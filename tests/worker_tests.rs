use flume::Receiver;
use std::time::{Duration, Instant};

use serterm::protocol::{
    settings::{FlowControl, OpenMode, PortSettings},
    transport::{LineOp, PinoutSignals, TransportErrorKind, VirtualPeer},
    worker::{AutoLogConfig, Pacing, SerialWorker, WorkerEvent, WorkerOptions},
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

fn settings() -> PortSettings {
    PortSettings {
        name: "virtual0".to_string(),
        baud_rate: 9600,
        ..PortSettings::default()
    }
}

fn options(pacing: Pacing) -> WorkerOptions {
    WorkerOptions {
        recreate_transport_on_reopen: false,
        reopen_settle: Duration::from_millis(10),
        pacing,
        ..WorkerOptions::default()
    }
}

fn fast() -> Pacing {
    Pacing {
        delay_after_byte_ms: 0,
        delay_after_chr_ms: 0,
        delay_chr: Vec::new(),
    }
}

/// Receive events until one matches, returning everything seen on the way.
fn collect_until(
    events: &Receiver<WorkerEvent>,
    what: &str,
    done: impl Fn(&WorkerEvent) -> bool,
) -> Vec<WorkerEvent> {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                let finished = done(&event);
                seen.push(event);
                if finished {
                    return seen;
                }
            }
            Err(err) => panic!("no {what} event ({err}), saw {seen:?}"),
        }
    }
}

fn open(worker: &SerialWorker, events: &Receiver<WorkerEvent>, mode: OpenMode) {
    assert!(worker.open(mode));
    collect_until(events, "port opened", |e| {
        *e == WorkerEvent::PortStatusChanged(true)
    });
    // Status is published right after the event is emitted.
    wait_until("status published", || worker.is_open());
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_bytes_arrive_in_call_order() {
    let peer = VirtualPeer::new();
    let pacing = Pacing {
        delay_after_byte_ms: 1,
        ..fast()
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(pacing)).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    let parts: [&[u8]; 4] = [b"first ", b"second ", b"", b"third"];
    let mut expected = Vec::new();
    for part in parts {
        assert_eq!(worker.write(part, b""), part.len());
        expected.extend_from_slice(part);
    }

    wait_until("all bytes written", || peer.written().len() == expected.len());
    assert_eq!(peer.written(), expected);
    assert!(peer.writes().iter().all(|w| w.bytes.len() == 1));
    assert_eq!(worker.pending_bytes(), 0);
}

#[test]
fn test_at_command_is_paced_and_answered() {
    let peer = VirtualPeer::new();
    peer.respond_to(b"AT\r", b"OK\r\n");
    let pacing = Pacing {
        delay_after_byte_ms: 2,
        delay_after_chr_ms: 5,
        delay_chr: b"\r".to_vec(),
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(pacing)).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    worker.write(b"AT\r", b"");
    let seen = collect_until(&events, "finish", |e| *e == WorkerEvent::Finish);
    assert!(seen.contains(&WorkerEvent::ReadyRead), "{seen:?}");
    assert_eq!(worker.read_all(Duration::ZERO), b"OK\r\n");

    let writes = peer.writes();
    let bytes: Vec<Vec<u8>> = writes.iter().map(|w| w.bytes.clone()).collect();
    assert_eq!(bytes, [b"A".to_vec(), b"T".to_vec(), b"\r".to_vec()]);
    assert!(writes[1].at - writes[0].at >= Duration::from_millis(2));
    assert!(writes[2].at - writes[1].at >= Duration::from_millis(2));
}

#[test]
fn test_native_line_ending_is_substituted() {
    let peer = VirtualPeer::new();
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    let mut line = b"ATI".to_vec();
    line.extend_from_slice(serterm::protocol::worker::NATIVE_LINE_ENDING);
    worker.write(&line, b"\r\n");
    wait_until("line written", || peer.written().len() == 5);
    assert_eq!(peer.written(), b"ATI\r\n");
}

#[test]
fn test_open_applies_line_parameters() {
    let peer = VirtualPeer::new();
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    let ops = peer.ops();
    assert_eq!(ops[0], LineOp::Open("virtual0".to_string()));
    assert_eq!(ops[1], LineOp::BaudRate(9600));
    assert!(ops.contains(&LineOp::FlowControl(FlowControl::None)));
    assert!(worker.is_open());
    assert_eq!(
        worker.port_description(),
        "virtual0, 9600, 8N1, No handshake"
    );
}

#[test]
fn test_open_failure_is_reported() {
    let peer = VirtualPeer::new();
    peer.set_open_failure(Some(TransportErrorKind::NotFound));
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();

    worker.open(OpenMode::ReadWrite);
    let seen = collect_until(&events, "error message", |e| {
        matches!(e, WorkerEvent::Message { is_error: true, .. })
    });
    match seen.last() {
        Some(WorkerEvent::Message { text, .. }) => {
            assert!(text.starts_with("Cannot open port virtual0"), "{text}")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!seen.contains(&WorkerEvent::PortStatusChanged(true)));
    assert!(!worker.is_open());
}

#[test]
fn test_reopen_closes_first() {
    let peer = VirtualPeer::new();
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    worker.set_baud_rate(19_200);
    worker.open(OpenMode::ReadWrite);
    let seen = collect_until(&events, "reopened", |e| {
        *e == WorkerEvent::PortStatusChanged(true)
    });
    assert!(seen.contains(&WorkerEvent::PortStatusChanged(false)));

    let ops = peer.ops();
    let opens = ops.iter().filter(|op| matches!(op, LineOp::Open(_))).count();
    assert_eq!(opens, 2);
    assert!(ops.contains(&LineOp::Close));
    assert!(ops.contains(&LineOp::BaudRate(19_200)));
}

#[test]
fn test_recreate_transport_on_reopen() {
    let peer = VirtualPeer::new();
    let options = WorkerOptions {
        recreate_transport_on_reopen: true,
        ..options(fast())
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    assert_eq!(peer.created(), 2);
    let ops = peer.ops();
    assert_eq!(ops[0], LineOp::Open("virtual0".to_string()));
    assert_eq!(ops[1], LineOp::Close);
    assert_eq!(ops[2], LineOp::Open("virtual0".to_string()));
}

#[test]
fn test_progress_only_for_long_batches() {
    let peer = VirtualPeer::new();
    let pacing = Pacing {
        delay_after_byte_ms: 1,
        ..fast()
    };
    let options = WorkerOptions {
        progress_threshold: Duration::from_millis(20),
        ..options(pacing)
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    worker.write(&[b'x'; 10], b"");
    let short = collect_until(&events, "finish", |e| *e == WorkerEvent::Finish);
    assert!(!short
        .iter()
        .any(|e| matches!(e, WorkerEvent::Progress { .. })));

    worker.write(&[b'y'; 30], b"");
    let long = collect_until(&events, "finish", |e| *e == WorkerEvent::Finish);
    let progress: Vec<(String, f32)> = long
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::Progress { text, percent } => Some((text, percent)),
            _ => None,
        })
        .collect();
    assert_eq!(progress.first(), Some(&("Sending 30 bytes".to_string(), 0.0)));
    assert_eq!(progress.last(), Some(&("30 bytes sent".to_string(), 100.0)));
    assert!(progress
        .iter()
        .any(|(text, _)| text == "15 bytes of 30 bytes sent"));
}

#[test]
fn test_abort_drops_queued_bytes() {
    let peer = VirtualPeer::new();
    let pacing = Pacing {
        delay_after_byte_ms: 20,
        ..fast()
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(pacing)).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    worker.write(&[b'z'; 50], b"");
    wait_until("first bytes", || peer.written().len() >= 2);
    worker.abort_send();
    collect_until(&events, "finish", |e| *e == WorkerEvent::Finish);

    assert!(peer.written().len() < 50);
    assert_eq!(worker.pending_bytes(), 0);
}

#[test]
fn test_close_preempts_write_batch() {
    let peer = VirtualPeer::new();
    let pacing = Pacing {
        delay_after_byte_ms: 20,
        ..fast()
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(pacing)).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    worker.write(&[b'q'; 50], b"");
    wait_until("first bytes", || !peer.written().is_empty());
    worker.close();
    let seen = collect_until(&events, "closed", |e| {
        *e == WorkerEvent::PortStatusChanged(false)
    });
    assert!(seen.contains(&WorkerEvent::Finish));
    assert!(peer.written().len() < 50);
    assert_eq!(worker.pending_bytes(), 0);
}

#[test]
fn test_read_only_port_discards_writes() {
    let peer = VirtualPeer::new();
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadOnly);

    worker.write(b"no", b"");
    let seen = collect_until(&events, "finish", |e| *e == WorkerEvent::Finish);
    assert!(seen.contains(&WorkerEvent::error_message(
        "Port is not open for writing, 2 bytes discarded"
    )));
    assert!(peer.written().is_empty());
}

#[test]
fn test_inbound_data_and_read_errors() {
    let peer = VirtualPeer::new();
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    peer.inject(b"hello");
    collect_until(&events, "ready read", |e| *e == WorkerEvent::ReadyRead);
    assert_eq!(worker.read_all(Duration::from_millis(100)), b"hello");
    assert!(worker.read_all(Duration::ZERO).is_empty());

    peer.fail_next_read(TransportErrorKind::Read);
    let seen = collect_until(&events, "error", |e| matches!(e, WorkerEvent::Error(_)));
    match seen.last() {
        Some(WorkerEvent::Error(err)) => {
            assert_eq!(err.kind(), TransportErrorKind::Read);
            assert!(err.kind().is_fatal());
        }
        other => panic!("unexpected {other:?}"),
    }
    // The worker reports, the controller decides whether to close.
    assert!(worker.is_open());
}

#[test]
fn test_pinout_changes_are_reported() {
    let peer = VirtualPeer::new();
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    peer.set_remote_signals(PinoutSignals::CTS.with(PinoutSignals::DSR, true));
    collect_until(&events, "cts", |e| {
        matches!(e, WorkerEvent::PinoutSignalsChanged(s) if s.contains(PinoutSignals::CTS))
    });
    assert!(worker.pinout_signals().contains(PinoutSignals::DSR));

    worker.toggle_dtr();
    collect_until(&events, "dtr dropped", |e| {
        matches!(e, WorkerEvent::PinoutSignalsChanged(s) if !s.contains(PinoutSignals::DTR))
    });
    assert!(peer.ops().contains(&LineOp::Dtr(false)));
}

#[test]
fn test_line_control_refused_under_hardware_flow() {
    let peer = VirtualPeer::new();
    let settings = PortSettings {
        flow_control: FlowControl::Hardware,
        ..settings()
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings, options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    worker.set_request_to_send(false);
    collect_until(&events, "refusal", |e| {
        *e == WorkerEvent::error_message(
            "DTR/RTS cannot be changed while hardware flow control is active",
        )
    });
    assert!(!peer.ops().contains(&LineOp::Rts(false)));
}

#[test]
fn test_stop_closes_port() {
    let peer = VirtualPeer::new();
    let (mut worker, events) =
        SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    assert!(worker.stop(Duration::from_secs(1)));
    assert!(!worker.is_running());
    assert!(!worker.open(OpenMode::ReadWrite));
    assert_eq!(peer.ops().last(), Some(&LineOp::Close));
    assert!(worker.stop(Duration::from_secs(1)));
}

#[test]
fn test_stop_gives_up_on_wedged_transport() {
    let peer = VirtualPeer::new();
    let (mut worker, events) =
        SerialWorker::spawn(peer.clone(), settings(), options(fast())).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);

    peer.stall_writes(Some(Duration::from_millis(400)));
    worker.write(b"x", b"");
    std::thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    assert!(!worker.stop(Duration::from_millis(50)));
    assert!(started.elapsed() < Duration::from_millis(300));
}

#[test]
fn test_auto_log_records_session() {
    let dir = std::env::temp_dir().join(format!("serterm-worker-log-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let peer = VirtualPeer::new();
    peer.respond_to(b"AT\r", b"OK\r\n");
    let options = WorkerOptions {
        auto_log: AutoLogConfig {
            enabled: true,
            directory: dir.clone(),
            ..AutoLogConfig::default()
        },
        line_ending_rx: b"\r\n".to_vec(),
        line_ending_tx: b"\r".to_vec(),
        ..options(fast())
    };
    let (worker, events) = SerialWorker::spawn(peer.clone(), settings(), options).unwrap();
    open(&worker, &events, OpenMode::ReadWrite);
    let path = worker.auto_log_path().expect("log should be active");
    assert!(path.starts_with(&dir));

    worker.write(b"AT\r", b"");
    collect_until(&events, "reply", |e| *e == WorkerEvent::ReadyRead);
    worker.close();
    collect_until(&events, "closed", |e| {
        *e == WorkerEvent::PortStatusChanged(false)
    });

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Start logging on "), "{text}");
    assert!(text.contains("serial port virtual0, 9600, 8N1, No handshake"));
    assert!(text.contains("AT\r"));
    assert!(text.contains("OK\r\n"));
    assert!(text.contains("Stop logging on "));
    std::fs::remove_dir_all(&dir).ok();
}
