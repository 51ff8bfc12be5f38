//! Drain callback tests
//!
//! Exercise `MonitorSink::fill` against a live frame worker: exact fill
//! length, bounded latency, silence outside `Running`, and FIFO ordering.

mod helpers;

use helpers::{decode_pcm, fast_config, start_frame_clock, test_apu, wait_until, ConstMixer, CountingMixer};
use serial_test::serial;
use std::time::{Duration, Instant};
use xapu_core::mixer::SilenceMixer;
use xapu_core::RunState;

const FRAME: usize = 1024;
const POISON: u8 = 0xAA;

#[test]
#[serial]
fn test_silence_before_running_leaves_fifo_untouched() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(ConstMixer::new(0.5)));
    start_frame_clock(&apu);

    let high = apu.watermarks().high;
    assert!(wait_until(Duration::from_secs(2), || apu.queued_bytes() >= high));

    let sink = apu.sink();
    let mut dst = vec![POISON; FRAME];
    sink.fill(&mut dst);

    assert!(dst.iter().all(|&b| b == 0));
    assert_eq!(apu.queued_bytes(), high);
}

#[test]
#[serial]
fn test_paused_emits_silence_without_waiting() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    apu.set_run_state(RunState::Paused).unwrap();

    let sink = apu.sink();
    let mut dst = vec![POISON; 4 * FRAME];
    let start = Instant::now();
    sink.fill(&mut dst);

    assert!(dst.iter().all(|&b| b == 0));
    // No retry sleeps when not running
    assert!(start.elapsed() < Duration::from_millis(5), "took {:?}", start.elapsed());
    assert_eq!(apu.stats_snapshot().monitor.underruns, 0);
}

#[test]
#[serial]
fn test_fill_writes_exactly_the_requested_length() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(ConstMixer::new(0.5)));
    start_frame_clock(&apu);
    apu.set_run_state(RunState::Running).unwrap();
    let sink = apu.sink();

    for n in [0usize, 1, 3, 4, 1000, FRAME, 3 * FRAME, 10 * FRAME] {
        let mut dst = vec![POISON; n + 16];
        sink.fill(&mut dst[..n]);

        assert!(dst[..n].iter().all(|&b| b != POISON), "n={}: unwritten bytes", n);
        assert!(dst[n..].iter().all(|&b| b == POISON), "n={}: wrote past the end", n);
    }
}

#[test]
#[serial]
fn test_starved_fill_is_bounded_and_zero_filled() {
    // Frame clock never started: nothing is ever produced
    let config = fast_config();
    let budget = config.drain_retry_sleep * config.drain_retry_count;
    let (apu, _bus) = test_apu(config, Box::new(ConstMixer::new(0.5)));
    apu.set_run_state(RunState::Running).unwrap();

    let sink = apu.sink();
    let mut dst = vec![POISON; FRAME];
    let start = Instant::now();
    sink.fill(&mut dst);
    let elapsed = start.elapsed();

    assert!(dst.iter().all(|&b| b == 0));
    assert!(elapsed >= budget, "returned after {:?}, budget {:?}", elapsed, budget);
    assert!(elapsed < budget + Duration::from_millis(100), "took {:?}", elapsed);

    let stats = apu.stats_snapshot();
    assert_eq!(stats.monitor.underruns, 1);
    assert_eq!(stats.drain_calls, 1);
}

#[test]
#[serial]
fn test_drained_bytes_arrive_in_production_order() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(CountingMixer::default()));
    start_frame_clock(&apu);

    let high = apu.watermarks().high;
    assert_eq!(high, 3 * FRAME);
    assert!(wait_until(Duration::from_secs(2), || apu.queued_bytes() >= high));
    apu.set_run_state(RunState::Running).unwrap();

    let sink = apu.sink();
    let mut next = 0i16;
    for request in [3 * FRAME, FRAME, FRAME, 2 * FRAME] {
        assert!(wait_until(Duration::from_secs(2), || apu.queued_bytes() >= request));
        let mut dst = vec![0u8; request];
        sink.fill(&mut dst);

        let samples = decode_pcm(&dst);
        for frame in samples.chunks_exact(2) {
            assert_eq!(frame[0], next, "left channel out of order");
            assert_eq!(frame[1], 0);
            next += 1;
        }
    }
    assert_eq!(next as usize, 7 * FRAME / 4);
    assert_eq!(apu.stats_snapshot().monitor.underruns, 0);
}

#[test]
#[serial]
fn test_steady_consumer_sees_no_underruns() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(ConstMixer::new(0.25)));
    start_frame_clock(&apu);
    apu.set_run_state(RunState::Running).unwrap();

    let high = apu.watermarks().high;
    assert!(wait_until(Duration::from_secs(2), || apu.queued_bytes() >= high));

    // One frame every frame period for a quarter second
    let sink = apu.sink();
    let period = apu.config().geometry.frame_period();
    let mut dst = vec![0u8; FRAME];
    let start = Instant::now();
    for i in 1..=48u32 {
        sink.fill(&mut dst);
        let expected = encode(0.25);
        assert!(decode_pcm(&dst).iter().all(|&s| s == expected));
        if let Some(rest) = (period * i).checked_sub(start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let stats = apu.stats_snapshot();
    assert_eq!(stats.monitor.underruns, 0);
    assert!(stats.monitor.queued_bytes <= high);
}

fn encode(value: f32) -> i16 {
    (value * i16::MAX as f32) as i16
}
