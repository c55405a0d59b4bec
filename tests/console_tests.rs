use std::time::{Duration, Instant};

use serterm::{
    core::{
        console::{dump_buf, ConsoleModel, ConsoleOptions, TrimPolicy},
        multistring::{Mode, MultiString},
        timestamp::TimestampFormat,
    },
    protocol::{
        settings::{OpenMode, PortSettings},
        transport::VirtualPeer,
        worker::{Pacing, SerialWorker, WorkerEvent, WorkerOptions},
    },
};

#[test]
fn test_hex_view_of_twenty_bytes() {
    let mut console = ConsoleModel::new(ConsoleOptions {
        hex_mode: true,
        hex_wrap_width: 16,
        ..ConsoleOptions::default()
    });
    let bytes: Vec<u8> = (0u8..20).collect();
    console.put_data(&bytes);

    let expected = concat!(
        "00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F   ................\n",
        "10 11 12 13                           ....            \n",
    );
    assert_eq!(console.text(), expected);
    assert_eq!(dump_buf(console.all_data(), 16), expected);

    console.set_hex_mode(false);
    console.set_hex_mode(true);
    assert_eq!(console.text(), expected);
}

#[test]
fn test_hysteresis_never_empties_history() {
    let mut console = ConsoleModel::new(ConsoleOptions {
        trim: TrimPolicy {
            size_limit: 100,
            hysteresis_percent: 10,
        },
        timestamp_format: TimestampFormat::parse("").unwrap(),
        ..ConsoleOptions::default()
    });
    console.put_data(&[b'a'; 100]);
    assert_eq!(console.all_data().len(), 100);
    console.put_data(b"b");
    assert_eq!(console.all_data().len(), 90);
    assert_eq!(console.all_data().last(), Some(&b'b'));
    console.put_data(&[b'c'; 500]);
    assert_eq!(console.all_data().len(), 90);
}

#[test]
fn test_timestamps_count_against_the_limit() {
    let mut console = ConsoleModel::new(ConsoleOptions {
        trim: TrimPolicy {
            size_limit: 64,
            hysteresis_percent: 0,
        },
        timestamp_format: TimestampFormat::parse("[%S] ").unwrap(),
        ..ConsoleOptions::default()
    });
    for _ in 0..40 {
        console.put_data(b"?b\r\n");
    }
    let raw_lines = console.all_data().iter().filter(|&&b| b == b'\n').count();
    let stamped_lines = console
        .timestamped_data()
        .iter()
        .filter(|&&b| b == b'\n')
        .count();
    assert_eq!(raw_lines, stamped_lines);
    assert!(console.timestamped_data().len() <= 64);
    assert!(console.all_data().len() < console.timestamped_data().len());
    console.set_hex_mode(true);
    let hex_rows = console.text().lines().count();
    assert_eq!(hex_rows, console.all_data().len().div_ceil(16));
}

#[test]
fn test_input_bytes_survive_mode_round_trip() {
    for mode in [Mode::Hexadecimal, Mode::Decimal, Mode::Binary] {
        let mut text = MultiString::new("Hi!\r", Mode::Ascii);
        text.set_mode(mode);
        text.set_mode(Mode::Ascii);
        assert_eq!(text.get_byte_array().bytes, b"Hi!\r", "through {mode}");
    }
}

#[test]
fn test_worker_to_console_pipeline() {
    let peer = VirtualPeer::echo();
    let settings = PortSettings {
        name: "loopback".to_string(),
        ..PortSettings::default()
    };
    let options = WorkerOptions {
        pacing: Pacing {
            delay_after_byte_ms: 0,
            delay_after_chr_ms: 0,
            delay_chr: Vec::new(),
        },
        ..WorkerOptions::default()
    };
    let (worker, events) = SerialWorker::spawn(peer, settings, options).unwrap();
    worker.open(OpenMode::ReadWrite);
    loop {
        match events.recv_timeout(Duration::from_secs(3)).unwrap() {
            WorkerEvent::PortStatusChanged(true) => break,
            _ => continue,
        }
    }

    let mut console = ConsoleModel::default();
    worker.write(b"X\r\nY\x08Z", b"");
    let deadline = Instant::now() + Duration::from_secs(3);
    while console.all_data().len() < 6 {
        assert!(Instant::now() < deadline, "echo did not arrive");
        if let Ok(WorkerEvent::ReadyRead) = events.recv_timeout(Duration::from_millis(50)) {
            console.put_data(&worker.read_all(Duration::ZERO));
        }
    }
    assert_eq!(console.text(), "X\nZ");
}
