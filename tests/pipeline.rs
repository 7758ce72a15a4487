use std::sync::atomic::Ordering;
use std::time::Duration;

use axisfilter::config::AppConfig;
use axisfilter::sensor::{
    AcquisitionError, EventSource, LoopExit, MemorySink, PipelineError, PipelineHandle, RawEvent,
    ReplaySource, SourceError,
};
use axisfilter::RunFlag;

fn spawn(
    config: &AppConfig,
    source: ReplaySource,
    sink: MemorySink,
    running: RunFlag,
) -> PipelineHandle {
    PipelineHandle::spawn(
        config.build_store(),
        Box::new(source),
        Box::new(sink),
        running,
        config.pipeline_settings(),
    )
    .unwrap()
}

#[tokio::test]
async fn end_of_stream_shuts_down_cleanly() {
    let config = AppConfig::default();
    let source = ReplaySource::new(vec![
        RawEvent::new(3, 2),
        RawEvent::new(4, -9),
        RawEvent::new(5, 101),
        RawEvent::new(0, 0),
        RawEvent::new(9, 7),
    ]);
    let grabbed = source.grab_state();
    let running = RunFlag::new();

    let pipeline = spawn(&config, source, MemorySink::new(), running.clone());
    let report = pipeline.wait().await.unwrap();

    assert_eq!(report.exit, LoopExit::EndOfStream);
    assert_eq!(report.acquisition.accepted, 3);
    assert_eq!(report.acquisition.discarded, 2);
    assert!(!running.is_running());
    assert!(!grabbed.load(Ordering::SeqCst));

    let readings = report.final_snapshot.readings;
    assert_eq!(readings.map(|r| r.code), [3, 4, 5]);
    assert_eq!(readings.map(|r| r.raw), [10.0, 0.0, 10.0]);
    assert!((readings[0].smoothed - 6.6667).abs() < 1e-3);
    assert_eq!(readings[1].smoothed, 0.0);
    assert_eq!(report.final_snapshot.sequence, 3);
}

#[tokio::test]
async fn read_failure_tears_down_then_reports_error() {
    let config = AppConfig::default();
    let source =
        ReplaySource::new(vec![RawEvent::new(3, 0)]).fail_after_events("device unplugged");
    let grabbed = source.grab_state();
    let running = RunFlag::new();

    let pipeline = spawn(&config, source, MemorySink::new(), running.clone());
    let err = pipeline.wait().await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Acquisition(AcquisitionError::Read(SourceError::Read(_)))
    ));
    assert!(!running.is_running());
    assert!(!grabbed.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupt_stops_endless_stream() {
    let mut config = AppConfig::default();
    config.reporter.interval_ms = 20;
    let source = ReplaySource::new(vec![RawEvent::new(3, 1), RawEvent::new(4, 1)])
        .looping(true)
        .with_pacing(Duration::from_millis(1));
    let grabbed = source.grab_state();
    let sink = MemorySink::new();
    let running = RunFlag::new();

    let pipeline = spawn(&config, source, sink.clone(), running.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    running.stop();

    let report = tokio::time::timeout(Duration::from_secs(2), pipeline.wait())
        .await
        .expect("pipeline did not stop in time")
        .unwrap();

    assert_eq!(report.exit, LoopExit::Stopped);
    assert!(report.acquisition.accepted > 0);
    assert!(report.reports > 0);
    assert_eq!(sink.snapshots().len() as u64, report.reports);
    assert!(!grabbed.load(Ordering::SeqCst));

    // Snapshots only ever move forward
    let sequences: Vec<u64> = sink.snapshots().iter().map(|s| s.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn out_of_range_traffic_leaves_axes_untouched() {
    let config = AppConfig::default();
    let initial = config.build_store().snapshot();
    let source = ReplaySource::new((0..50).map(|i| RawEvent::new(100 + i, 1_000)).collect());

    let report = spawn(&config, source, MemorySink::new(), RunFlag::new())
        .wait()
        .await
        .unwrap();

    assert_eq!(report.acquisition.accepted, 0);
    assert_eq!(report.acquisition.discarded, 50);
    assert_eq!(report.final_snapshot, initial);
}

#[tokio::test]
async fn non_exclusive_config_never_grabs() {
    let mut config = AppConfig::default();
    config.exclusive_grab = false;
    let source = ReplaySource::new(vec![RawEvent::new(5, 91)]);
    let grabbed = source.grab_state();

    let pipeline = spawn(&config, source, MemorySink::new(), RunFlag::new());
    assert!(!grabbed.load(Ordering::SeqCst));

    let report = pipeline.wait().await.unwrap();
    assert_eq!(report.final_snapshot.readings[2].raw, 0.0);
    assert_eq!(report.final_snapshot.sequence, 1);
}

#[derive(Debug)]
struct PanickingSource;

impl EventSource for PanickingSource {
    fn acquire(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<RawEvent>, SourceError> {
        panic!("driver bug");
    }

    fn describe(&self) -> String {
        "panicking".to_string()
    }
}

#[tokio::test]
async fn acquisition_panic_surfaces_as_join_error() {
    let config = AppConfig::default();
    let running = RunFlag::new();
    let pipeline = PipelineHandle::spawn(
        config.build_store(),
        Box::new(PanickingSource),
        Box::new(MemorySink::new()),
        running.clone(),
        config.pipeline_settings(),
    )
    .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), pipeline.wait())
        .await
        .expect("pipeline hung after acquisition panic")
        .unwrap_err();

    assert!(matches!(err, PipelineError::Join(_)));
    assert!(!running.is_running());
}
