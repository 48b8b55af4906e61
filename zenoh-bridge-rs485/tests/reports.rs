use std::time::Duration;

use rs485_master::{
    EngineSettings, MasterEngine, NoDirection, PollError, SlaveConfig, SlaveSimulator,
};
use tokio::io::duplex;
use tokio::time::sleep;
use zenoh_bridge_rs485::publisher::collect_reports;
use zenoh_bridge_rs485::{Format, SlaveReport, SlaveStatus, decode, encode};

#[tokio::test(start_paused = true)]
async fn test_reports_follow_engine_state() {
    let sim = SlaveSimulator::new()
        .with_slave(1, vec![100, 200, 300, 400, 500, 600])
        .with_slave(2, vec![1, 2, 3, 4]);
    sim.set_silent(2, true);

    let (master_io, slave_io) = duplex(1024);
    sim.attach(slave_io);
    let engine = MasterEngine::new(master_io, NoDirection, EngineSettings::default());

    engine
        .register(SlaveConfig::new(1, 0, 6, 2000).with_name("meter"))
        .await
        .unwrap();
    engine.register(SlaveConfig::new(2, 0, 4, 5000)).await.unwrap();
    engine.start().await.unwrap();

    // Slave 2 times out after about a second.
    sleep(Duration::from_millis(1500)).await;

    let registry = engine.registry();
    let reports = collect_reports(&registry).await.unwrap();
    assert_eq!(reports.len(), 2);

    let meter = &reports[0];
    assert_eq!(meter.name, "meter");
    assert_eq!(meter.values, vec![100, 200, 300, 400, 500, 600]);
    assert_eq!(meter.status, SlaveStatus::Online);
    assert!(meter.age_ms.unwrap() >= 1000);
    assert!(meter.timestamp.is_some());

    let silent = &reports[1];
    assert_eq!(silent.name, "slave2");
    assert_eq!(silent.status, SlaveStatus::Offline);
    let error = silent.last_error.as_ref().unwrap();
    assert_eq!(error.code, PollError::IoTimeout.code());
    assert_eq!(error.name, "io_timeout");

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_report_survives_both_encodings() {
    let sim = SlaveSimulator::new().with_slave(5, vec![42, 43]);
    let (master_io, slave_io) = duplex(1024);
    sim.attach(slave_io);
    let engine = MasterEngine::new(master_io, NoDirection, EngineSettings::default());

    engine.register(SlaveConfig::new(5, 0, 2, 1000)).await.unwrap();
    engine.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let report = collect_reports(&engine.registry()).await.unwrap().remove(0);
    for format in [Format::Json, Format::Cbor] {
        let bytes = encode(&report, format).unwrap();
        let decoded: SlaveReport = decode(&bytes, format).unwrap();
        assert_eq!(decoded, report);
    }

    engine.stop().await.unwrap();
}
