//! End-to-end tests of the master engine against simulated slaves.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use rs485_master::{
    EngineSettings, MAX_SLAVES, MasterEngine, MasterError, NoDirection, PollError,
    SharedDirection, SlaveConfig, SlaveSimulator, build_read_response,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::time::sleep;

fn engine_with(sim: &SlaveSimulator) -> MasterEngine<DuplexStream, NoDirection> {
    let (master_io, slave_io) = duplex(1024);
    sim.attach(slave_io);
    MasterEngine::new(master_io, NoDirection, EngineSettings::default())
}

#[tokio::test(start_paused = true)]
async fn test_first_poll_fills_snapshot() {
    let sim = SlaveSimulator::new().with_slave(1, vec![10, 11, 12, 13, 14, 15]);
    let engine = engine_with(&sim);

    let slot = engine
        .register(SlaveConfig::new(1, 0, 6, 2000))
        .await
        .unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let snapshot = engine.snapshot(slot).await.unwrap();
    assert_eq!(snapshot.values, vec![10, 11, 12, 13, 14, 15]);
    assert_eq!(snapshot.last_error, None);
    assert_eq!(snapshot.last_error_code(), 0);
    assert!(snapshot.has_data());
    assert_eq!(sim.request_count(1), 1);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_slave_keeps_previous_values() {
    let sim = SlaveSimulator::new().with_slave(1, vec![7, 8, 9]);
    let engine = engine_with(&sim);

    let slot = engine.register(SlaveConfig::new(1, 0, 3, 100)).await.unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let good = engine.snapshot(slot).await.unwrap();
    assert_eq!(good.values, vec![7, 8, 9]);
    let good_timestamp = good.timestamp_ms;
    assert!(good_timestamp.is_some());

    sim.set_silent(1, true);
    sim.set_registers(1, vec![1, 1, 1]);

    // Next poll at ~100 ms, times out after ~1 s.
    sleep(Duration::from_millis(1200)).await;

    let stale = engine.snapshot(slot).await.unwrap();
    assert_eq!(stale.last_error, Some(PollError::IoTimeout));
    assert_eq!(stale.values, vec![7, 8, 9]);
    assert_eq!(stale.timestamp_ms, good_timestamp);
    assert!(stale.consecutive_failures >= 1);

    // Recovery clears the error and refreshes the data.
    sim.set_silent(1, false);
    sleep(Duration::from_millis(1500)).await;

    let recovered = engine.snapshot(slot).await.unwrap();
    assert_eq!(recovered.last_error, None);
    assert_eq!(recovered.values, vec![1, 1, 1]);
    assert!(recovered.timestamp_ms > good_timestamp);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_crc_error_is_recorded() {
    let sim = SlaveSimulator::new().with_slave(4, vec![1, 2]);
    sim.set_corrupt_crc(4, true);
    let engine = engine_with(&sim);

    let slot = engine.register(SlaveConfig::new(4, 0, 2, 500)).await.unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let snapshot = engine.snapshot(slot).await.unwrap();
    assert_eq!(snapshot.last_error, Some(PollError::CrcMismatch));
    assert_eq!(snapshot.last_error_code(), PollError::CrcMismatch.code());
    assert_eq!(snapshot.values, vec![0, 0]);
    assert!(!snapshot.has_data());

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exception_response_is_address_or_function_mismatch() {
    // Slave only has two registers; asking for four yields an exception reply.
    let sim = SlaveSimulator::new().with_slave(2, vec![1, 2]);
    let engine = engine_with(&sim);

    let slot = engine.register(SlaveConfig::new(2, 0, 4, 500)).await.unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    let snapshot = engine.snapshot(slot).await.unwrap();
    assert_eq!(
        snapshot.last_error,
        Some(PollError::AddressOrFunctionMismatch)
    );

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_poll_cadence_follows_intervals() {
    let sim = SlaveSimulator::new()
        .with_slave(1, vec![0; 6])
        .with_slave(2, vec![0; 4]);
    let engine = engine_with(&sim);

    engine.register(SlaveConfig::new(1, 0, 6, 500)).await.unwrap();
    engine.register(SlaveConfig::new(2, 0, 4, 2000)).await.unwrap();
    engine.start().await.unwrap();

    sleep(Duration::from_millis(2100)).await;
    engine.stop().await.unwrap();

    let fast = sim.request_count(1);
    let slow = sim.request_count(2);
    assert!((4..=5).contains(&fast), "fast slave polled {} times", fast);
    assert!((1..=2).contains(&slow), "slow slave polled {} times", slow);
}

#[tokio::test(start_paused = true)]
async fn test_removed_slave_is_no_longer_polled() {
    let sim = SlaveSimulator::new().with_slave(1, vec![5]);
    let engine = engine_with(&sim);

    let slot = engine.register(SlaveConfig::new(1, 0, 1, 100)).await.unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_millis(250)).await;

    engine.unregister(slot).await.unwrap();
    let polled = sim.request_count(1);
    sleep(Duration::from_millis(500)).await;

    assert_eq!(sim.request_count(1), polled);
    assert!(matches!(
        engine.snapshot(slot).await,
        Err(MasterError::NotFound(_))
    ));
    assert_eq!(engine.count(), 0);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_registry_capacity_through_engine() {
    let engine = engine_with(&SlaveSimulator::new());

    for i in 0..MAX_SLAVES {
        engine
            .register(SlaveConfig::new(i as u8 + 1, 0, 1, 1000))
            .await
            .unwrap();
    }
    assert_eq!(engine.count(), MAX_SLAVES);
    assert!(matches!(
        engine.register(SlaveConfig::new(200, 0, 1, 1000)).await,
        Err(MasterError::Full(_))
    ));

    engine.unregister(17).await.unwrap();
    assert_eq!(
        engine
            .register(SlaveConfig::new(200, 0, 1, 1000))
            .await
            .unwrap(),
        17
    );
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_are_never_torn() {
    const REGISTERS: usize = 32;

    let sim = SlaveSimulator::new().with_slave(1, vec![0; REGISTERS]);
    let engine = Arc::new(engine_with(&sim));
    let slot = engine
        .register(SlaveConfig::new(1, 0, REGISTERS as u16, 20))
        .await
        .unwrap();
    engine.start().await.unwrap();

    let writer = {
        let sim = sim.clone();
        tokio::spawn(async move {
            for value in 1..=200u16 {
                sim.set_registers(1, vec![value; REGISTERS]);
                sleep(Duration::from_millis(7)).await;
            }
        })
    };

    let reader = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut distinct = std::collections::BTreeSet::new();
            for _ in 0..400 {
                let snapshot = engine.snapshot(slot).await.unwrap();
                let first = snapshot.values[0];
                assert!(
                    snapshot.values.iter().all(|v| *v == first),
                    "torn snapshot: {:?}",
                    snapshot.values
                );
                distinct.insert(first);
                sleep(Duration::from_millis(3)).await;
            }
            distinct.len()
        })
    };

    writer.await.unwrap();
    let distinct = reader.await.unwrap();
    assert!(distinct > 1);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_de_line_released_between_transactions() {
    let sim = SlaveSimulator::new().with_slave(1, vec![1, 2]);
    let (master_io, slave_io) = duplex(1024);
    sim.attach(slave_io);

    let de = SharedDirection::new();
    let engine = MasterEngine::new(master_io, de.clone(), EngineSettings::default());
    engine.register(SlaveConfig::new(1, 0, 2, 100)).await.unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_millis(350)).await;
    engine.stop().await.unwrap();

    let levels: Vec<bool> = de.history().iter().map(|(_, level)| *level).collect();
    assert!(levels.len() >= 2);
    // Strictly alternating on/off, ending released.
    for (i, level) in levels.iter().enumerate() {
        assert_eq!(*level, i % 2 == 0);
    }
    assert!(!de.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_slow_reply_within_timeout_succeeds() {
    let sim = SlaveSimulator::new()
        .with_slave(3, vec![11, 22])
        .with_response_delay(Duration::from_millis(300));
    let engine = engine_with(&sim);

    let slot = engine.register(SlaveConfig::new(3, 0, 2, 5000)).await.unwrap();
    engine.start().await.unwrap();

    sleep(Duration::from_millis(150)).await;
    let waiting = engine.snapshot(slot).await.unwrap();
    assert!(!waiting.has_data());
    assert_eq!(waiting.last_error, None);

    sleep(Duration::from_millis(250)).await;
    let snapshot = engine.snapshot(slot).await.unwrap();
    assert_eq!(snapshot.values, vec![11, 22]);
    assert_eq!(snapshot.last_error, None);
    assert!(snapshot.timestamp_ms >= Some(300));

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_does_not_shift_later_polls() {
    let (master_io, mut slave_io) = duplex(1024);
    let answered = Arc::new(AtomicU16::new(0));

    // Answers request n with register value n; the first reply comes only
    // after the master has given up on it.
    {
        let answered = answered.clone();
        tokio::spawn(async move {
            let mut request = [0u8; 8];
            while slave_io.read_exact(&mut request).await.is_ok() {
                let n = answered.load(Ordering::SeqCst) + 1;
                if n == 1 {
                    sleep(Duration::from_millis(1100)).await;
                }
                answered.store(n, Ordering::SeqCst);
                if slave_io.write_all(&build_read_response(1, &[n])).await.is_err() {
                    break;
                }
            }
        });
    }

    let engine = MasterEngine::new(master_io, NoDirection, EngineSettings::default());
    let slot = engine.register(SlaveConfig::new(1, 0, 1, 100)).await.unwrap();
    engine.start().await.unwrap();

    sleep(Duration::from_millis(1050)).await;
    let timed_out = engine.snapshot(slot).await.unwrap();
    assert_eq!(timed_out.last_error, Some(PollError::IoTimeout));
    assert!(!timed_out.has_data());

    sleep(Duration::from_millis(950)).await;
    engine.stop().await.unwrap();

    let answered = answered.load(Ordering::SeqCst);
    let snapshot = engine.snapshot(slot).await.unwrap();
    assert!(answered >= 5, "only {} replies", answered);
    assert_eq!(snapshot.last_error, None);
    assert_eq!(snapshot.values, vec![answered]);
}
