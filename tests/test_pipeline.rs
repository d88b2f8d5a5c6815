use char_pipeline::{
    BytesSource, ChannelSource, CharSource, FnTransform, MemoryLog, PipelineBuilder,
    PipelineError, ReaderSource, ResetTrigger, SharedSink, ShiftCipher, StageKind, Symbol,
    Transform, WriterLog, WriterSink,
};
use crossbeam::channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn plus_one() -> Arc<dyn Transform> {
    Arc::new(FnTransform::new("plus_one", |b: u8| b.wrapping_add(1)))
}

fn letters(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'A' + (i % 26) as u8).collect()
}

/// Counts how many times the pipeline asked for a character
struct CountingSource<S> {
    inner: S,
    fetches: Arc<AtomicUsize>,
}

impl<S: CharSource> CharSource for CountingSource<S> {
    fn next_symbol(&mut self) -> io::Result<Symbol> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.next_symbol()
    }
}

/// Tells the test each time the source starts waiting for a character
struct NotifyingSource {
    inner: ChannelSource,
    entered: Sender<()>,
}

impl CharSource for NotifyingSource {
    fn next_symbol(&mut self) -> io::Result<Symbol> {
        let _ = self.entered.send(());
        self.inner.next_symbol()
    }
}

#[test]
fn test_two_characters_plus_one() {
    let log = MemoryLog::new();
    let sink = SharedSink::new();
    let running = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(2)
        .build()
        .expect("Pipeline build failed")
        .start(BytesSource::new("AB"), plus_one(), sink.clone(), log.clone())
        .expect("Pipeline start failed");

    let report = running.wait().expect("Wait failed");

    assert_eq!(sink.contents(), b"BC");
    assert_eq!(report.characters_read, 2);
    assert_eq!(report.characters_emitted, 2);

    let snapshots = log.snapshots();
    assert_eq!(snapshots.len(), 1);
    let last = &snapshots[0];
    assert_eq!(last.input.total(), 2);
    assert_eq!(last.input.letter(b'A'), 1);
    assert_eq!(last.input.letter(b'B'), 1);
    assert_eq!(last.output.total(), 2);
    assert_eq!(last.output.letter(b'C'), 1);
}

#[test]
fn test_order_preserved_across_capacities() {
    let input = b"The quick brown fox jumps over the lazy dog.\n".repeat(20);
    for (n, m) in [(1, 1), (1, 7), (4, 2), (16, 16)] {
        let cipher = Arc::new(ShiftCipher::new(3));
        let expected: Vec<u8> = input.iter().map(|b| cipher.apply(*b)).collect();
        let sink = SharedSink::new();

        let running = PipelineBuilder::new()
            .input_capacity(n)
            .output_capacity(m)
            .build()
            .expect("Pipeline build failed")
            .start(
                BytesSource::new(input.clone()),
                cipher.clone(),
                sink.clone(),
                MemoryLog::new(),
            )
            .expect("Pipeline start failed");

        let report = running.wait().expect("Wait failed");
        assert_eq!(sink.contents(), expected, "capacities n={} m={}", n, m);
        assert_eq!(report.characters_emitted, input.len() as u64);
    }
}

#[test]
fn test_every_stage_sees_end_marker_once() {
    let input = letters(100);
    let running = PipelineBuilder::new()
        .input_capacity(3)
        .output_capacity(1)
        .build()
        .expect("Pipeline build failed")
        .start(
            BytesSource::new(input.clone()),
            plus_one(),
            SharedSink::new(),
            MemoryLog::new(),
        )
        .expect("Pipeline start failed");

    let report = running.wait().expect("Wait failed");
    for kind in StageKind::ALL {
        // One iteration per character plus the end marker
        assert_eq!(report.ticks.lifetime_of(kind), input.len() as u64 + 1, "{}", kind);
    }
}

#[test]
fn test_reset_after_first_character() {
    let (tx, rx) = unbounded();
    let (entered_tx, entered_rx) = unbounded();
    let source = NotifyingSource {
        inner: ChannelSource::new(rx),
        entered: entered_tx,
    };
    let log = MemoryLog::new();
    let sink = SharedSink::new();
    let running = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(2)
        .build()
        .expect("Pipeline build failed")
        .start(source, plus_one(), sink.clone(), log.clone())
        .expect("Pipeline start failed");

    // The source is now blocked waiting for data while holding the gate; queue
    // a reset behind it so it runs as soon as the first cycle completes.
    entered_rx.recv().unwrap();
    let coordinator = running.coordinator();
    let resetter = thread::spawn(move || coordinator.reset());
    thread::sleep(Duration::from_millis(100));

    tx.send(b'A').unwrap();
    let first = resetter.join().unwrap().expect("reset should flush");
    assert_eq!(first.sequence, 1);
    assert_eq!(first.input.total(), 1);
    assert_eq!(first.input.letter(b'A'), 1);
    assert_eq!(first.output.total(), 1);
    assert_eq!(first.output.letter(b'B'), 1);
    assert_eq!(sink.contents(), b"B");
    assert_eq!(sink.len(), 1);
    assert!(!running.is_finished());

    tx.send(b'B').unwrap();
    drop(tx);
    let report = running.wait().expect("Wait failed");

    assert_eq!(sink.contents(), b"BC");
    assert_eq!(report.resets, 1);
    assert_eq!(report.flushes, 2);
    let last = report.final_snapshot.expect("final snapshot");
    assert_eq!(last.sequence, 2);
    assert_eq!(last.input.total(), 1);
    assert_eq!(last.input.letter(b'B'), 1);
    assert_eq!(last.output.letter(b'C'), 1);
    assert_eq!(log.snapshots().len(), 2);
}

#[test]
fn test_counts_conserved_under_repeated_resets() {
    let input = letters(5_000);
    let log = MemoryLog::new();
    let sink = SharedSink::new();
    let running = PipelineBuilder::new()
        .input_capacity(3)
        .output_capacity(2)
        .build()
        .expect("Pipeline build failed")
        .start(BytesSource::new(input.clone()), plus_one(), sink.clone(), log.clone())
        .expect("Pipeline start failed");

    let coordinator = running.coordinator();
    let resetter = thread::spawn(move || {
        let mut resets = 0u64;
        while coordinator.reset().is_some() {
            resets += 1;
            thread::yield_now();
        }
        resets
    });

    let report = running.wait().expect("Wait failed");
    let resets = resetter.join().unwrap();

    let expected: Vec<u8> = input.iter().map(|b| b + 1).collect();
    assert_eq!(sink.contents(), expected);
    assert_eq!(report.resets, resets);
    assert_eq!(log.snapshots().len() as u64, resets + 1);
    assert_eq!(log.total_input(), input.len() as u64);
    assert_eq!(log.total_output(), input.len() as u64);
    for snapshot in log.snapshots() {
        // Each window is closed at a cycle boundary on both sides
        assert_eq!(snapshot.input.total(), snapshot.output.total());
    }
}

#[test]
fn test_rekey_partitions_stream_at_cycle_boundary() {
    let input = letters(3_000);
    let cipher = Arc::new(ShiftCipher::new(1));
    let log = MemoryLog::new();
    let running = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(3)
        .build()
        .expect("Pipeline build failed")
        .start(
            BytesSource::new(input.clone()),
            cipher.clone(),
            SharedSink::new(),
            log.clone(),
        )
        .expect("Pipeline start failed");

    // Key in force during each flushed window
    let keys = Arc::new(Mutex::new(Vec::new()));
    let trigger = {
        let cipher = Arc::clone(&cipher);
        let keys = Arc::clone(&keys);
        ResetTrigger::spawn(running.coordinator(), Duration::from_millis(1), move |_| {
            keys.lock().push(cipher.key());
            cipher.rotate(5);
        })
        .expect("Trigger spawn failed")
    };

    running.wait().expect("Wait failed");
    trigger.stop().expect("Trigger stop failed");
    keys.lock().push(cipher.key());

    let keys = keys.lock().clone();
    let snapshots = log.snapshots();
    assert_eq!(snapshots.len(), keys.len());
    for (snapshot, key) in snapshots.iter().zip(keys) {
        for letter in b'A'..=b'Z' {
            let encrypted = b'A' + (letter - b'A' + key) % 26;
            assert_eq!(
                snapshot.input.letter(letter),
                snapshot.output.letter(encrypted),
                "flush #{} letter {} key {}",
                snapshot.sequence,
                letter as char,
                key
            );
        }
    }
    assert_eq!(log.total_input(), input.len() as u64);
}

#[test]
fn test_no_cycle_starts_while_paused() {
    let (tx, rx) = bounded(4);
    let stop = Arc::new(AtomicBool::new(false));
    let feeder = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut sent = 0u64;
            while !stop.load(Ordering::SeqCst) {
                tx.send(b'A' + (sent % 26) as u8).expect("pipeline hung up");
                sent += 1;
            }
            sent
        })
    };

    let fetches = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: ChannelSource::new(rx),
        fetches: Arc::clone(&fetches),
    };
    let running = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(2)
        .build()
        .expect("Pipeline build failed")
        .start(source, plus_one(), SharedSink::new(), MemoryLog::new())
        .expect("Pipeline start failed");

    let wait_for_fetches = |target: usize| {
        let deadline = Instant::now() + Duration::from_secs(5);
        while fetches.load(Ordering::SeqCst) < target && Instant::now() < deadline {
            thread::yield_now();
        }
        assert!(fetches.load(Ordering::SeqCst) >= target, "source stalled");
    };
    wait_for_fetches(20);

    let coordinator = running.coordinator();
    let guard = coordinator
        .begin_reset()
        .expect("pipeline should still be running");
    let before = fetches.load(Ordering::SeqCst);
    let ticks_before = running.ticks().snapshot().lifetime;
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fetches.load(Ordering::SeqCst), before);
    assert_eq!(running.ticks().snapshot().lifetime, ticks_before);
    assert!(!running.is_finished());
    guard.end_reset();

    // Cycles resume once the pause is over
    wait_for_fetches(before + 10);
    stop.store(true, Ordering::SeqCst);
    let sent = feeder.join().expect("Feeder panicked");

    let report = running.wait().expect("Wait failed");
    assert_eq!(report.characters_read, sent);
    assert_eq!(report.resets, 1);
}

#[test]
fn test_reset_after_termination_is_noop() {
    let log = MemoryLog::new();
    let running = PipelineBuilder::new()
        .build()
        .expect("Pipeline build failed")
        .start(BytesSource::new("xyz"), plus_one(), SharedSink::new(), log.clone())
        .expect("Pipeline start failed");
    let coordinator = running.coordinator();

    running.wait().expect("Wait failed");
    assert!(coordinator.is_terminated());
    assert!(coordinator.reset().is_none());
    assert!(coordinator.begin_reset().is_none());
    assert_eq!(log.snapshots().len(), 1);
    assert_eq!(coordinator.flushes(), 1);
}

#[test]
fn test_file_backed_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("input.txt");
    let output_path = dir.path().join("output.txt");
    let log_path = dir.path().join("counts.log");
    fs::write(&input_path, "Hello, World!").unwrap();

    let running = PipelineBuilder::new()
        .input_capacity(5)
        .output_capacity(3)
        .build()
        .expect("Pipeline build failed")
        .start(
            ReaderSource::new(File::open(&input_path).unwrap()),
            Arc::new(ShiftCipher::new(1)),
            WriterSink::new(File::create(&output_path).unwrap()),
            WriterLog::new(File::create(&log_path).unwrap()),
        )
        .expect("Pipeline start failed");
    let report = running.wait().expect("Wait failed");

    assert_eq!(report.characters_read, 13);
    assert_eq!(fs::read_to_string(&output_path).unwrap(), "Ifmmp, Xpsme!");
    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Flush #1"));
    assert!(log.contains("Total input count: 13"));
    assert!(log.contains("Total output count: 13"));
}

#[test]
fn test_source_error_still_drains_and_flushes() {
    struct FailsAfter {
        data: &'static [u8],
    }

    impl Read for FailsAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::other("device unplugged"));
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    let log = MemoryLog::new();
    let sink = SharedSink::new();
    let running = PipelineBuilder::new()
        .build()
        .expect("Pipeline build failed")
        .start(
            ReaderSource::new(FailsAfter { data: b"abc" }),
            plus_one(),
            sink.clone(),
            log.clone(),
        )
        .expect("Pipeline start failed");

    let result = running.wait();
    assert!(matches!(result, Err(PipelineError::Io(_))));
    assert_eq!(sink.contents(), b"bcd");
    assert_eq!(log.total_input(), 3);
}

#[test]
fn test_panicking_transform_still_drains_and_flushes() {
    let exploding = Arc::new(FnTransform::new("explodes_on_c", |b: u8| {
        if b == b'C' {
            panic!("cannot encode {}", b as char);
        }
        b + 1
    }));
    let log = MemoryLog::new();
    let sink = SharedSink::new();
    let running = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(1)
        .build()
        .expect("Pipeline build failed")
        .start(BytesSource::new("ABCD"), exploding, sink.clone(), log.clone())
        .expect("Pipeline start failed");
    let coordinator = running.coordinator();

    let result = running.wait();
    assert!(matches!(result, Err(PipelineError::StageError(_))));
    assert!(coordinator.is_terminated());

    // Output stops at the failing character, input is read to the end
    assert_eq!(sink.contents(), b"BC");
    let snapshots = log.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].input.total(), 4);
    assert_eq!(snapshots[0].output.total(), 2);
    assert_eq!(snapshots[0].output.letter(b'C'), 1);
}
