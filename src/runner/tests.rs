//! Process runner tests. `/bin/sh -c SCRIPT <archive>` stands in for unrar,
//! with the archive name arriving as `$0`.

#![cfg(unix)]

use super::*;
use crate::config::BusConfig;
use crate::types::{EventKind, TargetState};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

const EXTRACT_SCRIPT: &str = r#"
case "$0" in
    *fail*) echo "Extracting $0"; echo "CRC failed in $0" >&2; exit 3 ;;
    *) echo "Extracting $0"; echo "All OK" ;;
esac
"#;

fn sh_runner(script: &str, config: RunnerConfig) -> ProcessRunner {
    let archiver = CliArchiver::new("/bin/sh").with_extract_args(["-c", script]);
    ProcessRunner::new(archiver, config)
}

fn targets(dir: &Path, names: &[&str]) -> Vec<Target> {
    names.iter().map(|name| Target::new(*name, dir)).collect()
}

#[tokio::test]
async fn test_empty_run_reports_nothing() {
    let runner = sh_runner(EXTRACT_SCRIPT, RunnerConfig::default());
    let report = runner.run_all(Vec::new()).await;
    assert!(report.is_empty());
    assert!(report.error().is_none());
}

#[tokio::test]
async fn test_one_failure_does_not_affect_siblings() {
    let dir = TempDir::new().unwrap();
    let runner = sh_runner(EXTRACT_SCRIPT, RunnerConfig::default());
    let names = ["a.rar", "b-fail.rar", "c.rar", "d.rar"];

    let report = runner.run_all(targets(dir.path(), &names)).await;

    assert_eq!(report.len(), 4);
    let archives: Vec<_> = report.results.iter().map(|r| r.archive()).collect();
    assert_eq!(archives, names);

    assert_eq!(report.failure_count(), 1);
    assert_eq!(report.success_count(), 3);

    let failed = &report.results[1];
    assert!(matches!(
        failed.error,
        Some(Error::Execution(ExecutionError::ExitStatus { code: Some(3) }))
    ));
    assert_eq!(failed.exit_code, Some(3));
    let output = failed.output_lossy();
    assert!(output.contains("Extracting b-fail.rar"));
    assert!(output.contains("CRC failed in b-fail.rar"));

    let ok = &report.results[0];
    assert!(ok.is_success());
    assert_eq!(ok.exit_code, Some(0));
    assert!(ok.output_lossy().contains("All OK"));

    let message = report.error().unwrap().to_string();
    assert!(message.starts_with("encountered 1 of 4 extraction failures"), "{message}");
    assert!(message.contains("[b-fail.rar] did not complete successfully: exit status 3"));
}

#[tokio::test]
async fn test_all_failures_are_counted() {
    let dir = TempDir::new().unwrap();
    let runner = sh_runner(EXTRACT_SCRIPT, RunnerConfig::default());

    let report = runner
        .run_all(targets(dir.path(), &["x-fail.rar", "ok.rar", "y-fail.rar"]))
        .await;

    assert_eq!(report.failure_count(), 2);
    match report.error() {
        Some(Error::Extraction(failures)) => {
            assert_eq!(failures.failed, 2);
            assert_eq!(failures.total, 3);
            assert_eq!(failures.summary.lines().count(), 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_output_streams_are_combined_in_order() {
    let dir = TempDir::new().unwrap();
    let script = "echo out1; sleep 0.2; echo err1 >&2; sleep 0.2; echo out2";
    let runner = sh_runner(script, RunnerConfig::default());

    let report = runner.run_all(targets(dir.path(), &["a.rar"])).await;
    let result = &report.results[0];

    // stderr text with a zero exit is kept but is not a failure
    assert!(result.is_success());
    assert!(result.stderr_seen);
    assert_eq!(result.output_lossy(), "out1\nerr1\nout2\n");
}

#[tokio::test]
async fn test_runs_in_target_directory() {
    let dir = TempDir::new().unwrap();
    let runner = sh_runner("pwd -P; test -f \"$0\"", RunnerConfig::default());
    std::fs::write(dir.path().join("here.rar"), b"").unwrap();

    let report = runner.run_all(targets(dir.path(), &["here.rar"])).await;
    let result = &report.results[0];

    assert!(result.is_success(), "{:?}", result.error);
    let expected = std::fs::canonicalize(dir.path()).unwrap();
    assert_eq!(result.output_lossy().trim(), expected.to_string_lossy());
}

#[tokio::test]
async fn test_large_output_is_fully_drained() {
    let dir = TempDir::new().unwrap();
    // Well past any pipe buffer, on both streams
    let script = "head -c 1048576 /dev/zero; head -c 262144 /dev/zero >&2";
    let runner = sh_runner(script, RunnerConfig::default());

    let report = tokio::time::timeout(
        Duration::from_secs(20),
        runner.run_all(targets(dir.path(), &["big.rar"])),
    )
    .await
    .expect("run deadlocked");

    let result = &report.results[0];
    assert!(result.is_success());
    assert_eq!(result.output.len(), 1_048_576 + 262_144);
}

#[tokio::test]
async fn test_launch_failure_recorded_per_target() {
    let dir = TempDir::new().unwrap();
    let runner = ProcessRunner::new(
        CliArchiver::new("/nonexistent/unrar-xyz"),
        RunnerConfig::default(),
    );

    let report = runner.run_all(targets(dir.path(), &["a.rar", "b.rar"])).await;

    assert_eq!(report.failure_count(), 2);
    for result in &report.results {
        assert!(matches!(
            result.error,
            Some(Error::Execution(ExecutionError::Launch { .. }))
        ));
    }
}

#[tokio::test]
async fn test_cancellation_kills_running_archivers() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let runner = sh_runner("echo started; sleep 30", RunnerConfig::default())
        .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        runner.run_all(targets(dir.path(), &["a.rar", "b.rar"])),
    )
    .await
    .expect("cancellation did not stop the run");
    canceller.await.unwrap();

    assert_eq!(report.failure_count(), 2);
    for result in &report.results {
        assert!(matches!(
            result.error,
            Some(Error::Execution(ExecutionError::Cancelled))
        ));
    }
}

#[tokio::test]
async fn test_collect_timeout_synthesizes_missing_results() {
    let dir = TempDir::new().unwrap();
    let script = r#"case "$0" in slow*) sleep 30 ;; *) echo done ;; esac"#;
    let runner = sh_runner(
        script,
        RunnerConfig {
            collect_timeout: Some(Duration::from_millis(500)),
            ..RunnerConfig::default()
        },
    );

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        runner.run_all(targets(dir.path(), &["fast.rar", "slow.rar"])),
    )
    .await
    .expect("collector ignored its deadline");

    assert_eq!(report.len(), 2);
    assert!(report.results[0].is_success());
    assert_eq!(report.results[1].archive(), "slow.rar");
    assert!(matches!(
        report.results[1].error,
        Some(Error::Execution(ExecutionError::CollectTimeout(_)))
    ));
}

#[tokio::test]
async fn test_max_concurrent_serializes_runs() {
    let dir = TempDir::new().unwrap();
    // Fails if two archivers hold the lock directory at the same time
    let script = "mkdir lock 2>/dev/null || { echo overlap; exit 9; }; sleep 0.1; rmdir lock";
    let runner = sh_runner(
        script,
        RunnerConfig {
            max_concurrent: Some(1),
            ..RunnerConfig::default()
        },
    );

    let report = runner
        .run_all(targets(dir.path(), &["a.rar", "b.rar", "c.rar", "d.rar"]))
        .await;

    assert_eq!(report.failure_count(), 0, "{}", report.summary());
}

#[tokio::test]
async fn test_process_events_published_on_bus() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(CancellationToken::new(), BusConfig::default());
    bus.start();

    let started = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&started);
    bus.subscribe_fn(EventKind::ProcessStarted, move |_event, _cancel| {
        let s = Arc::clone(&s);
        async move {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let f = Arc::clone(&failed);
    bus.subscribe_fn(EventKind::ProcessFinished, move |event, _cancel| {
        let f = Arc::clone(&f);
        async move {
            if let Event::ProcessFinished { success: false, .. } = &*event {
                f.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    });

    let runner = sh_runner(EXTRACT_SCRIPT, RunnerConfig::default()).with_bus(bus.clone());
    let report = runner
        .run_all(targets(dir.path(), &["a.rar", "b-fail.rar"]))
        .await;
    assert_eq!(report.failure_count(), 1);

    assert!(bus.drain(Duration::from_secs(5)).await);
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().published, 4);

    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_finished_event_per_target_at_collect_deadline() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(CancellationToken::new(), BusConfig::default());
    bus.start();

    let finished = Arc::new(std::sync::Mutex::new(std::collections::HashMap::<String, usize>::new()));
    let seen = Arc::clone(&finished);
    bus.subscribe_fn(EventKind::ProcessFinished, move |event, _cancel| {
        let seen = Arc::clone(&seen);
        async move {
            if let Event::ProcessFinished { target, .. } = &*event {
                *seen.lock().unwrap().entry(target.archive.clone()).or_default() += 1;
            }
            Ok(())
        }
    });

    // Edge targets finish right around the collect deadline
    let script = r#"case "$0" in slow*) sleep 30 ;; edge*) sleep 0.3 ;; *) echo done ;; esac"#;
    let runner = sh_runner(
        script,
        RunnerConfig {
            collect_timeout: Some(Duration::from_millis(300)),
            ..RunnerConfig::default()
        },
    )
    .with_bus(bus.clone());
    let names: Vec<String> = (0..8)
        .map(|i| format!("edge{i}.rar"))
        .chain((0..4).map(|i| format!("fast{i}.rar")))
        .chain(["slow.rar".to_string()])
        .collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let report = runner.run_all(targets(dir.path(), &names)).await;
    assert_eq!(report.len(), names.len());
    assert!(matches!(
        report.results.last().unwrap().error,
        Some(Error::Execution(ExecutionError::CollectTimeout(_)))
    ));

    assert!(bus.drain(Duration::from_secs(5)).await);
    let finished = finished.lock().unwrap();
    assert_eq!(finished.len(), names.len());
    for (archive, count) in finished.iter() {
        assert_eq!(*count, 1, "{archive} finished {count} times");
    }

    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_bus_tracks_each_target_through_running_to_terminal() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new(CancellationToken::new(), BusConfig::default());
    bus.start();

    let transitions = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = Arc::clone(&transitions);
    bus.subscribe_all(Arc::new(crate::bus::HandlerFn::new(
        move |event: Arc<Event>, _cancel: CancellationToken| {
            let record = Arc::clone(&record);
            async move {
                if let Some((target, state)) = event.target_state() {
                    record.lock().unwrap().push((target.archive.clone(), state));
                }
                Ok(())
            }
        },
    )));

    let runner = sh_runner(EXTRACT_SCRIPT, RunnerConfig::default()).with_bus(bus.clone());
    runner
        .run_all(targets(dir.path(), &["a.rar", "b-fail.rar"]))
        .await;
    assert!(bus.drain(Duration::from_secs(5)).await);

    let transitions = transitions.lock().unwrap();
    let states_of = |archive: &str| -> Vec<TargetState> {
        transitions
            .iter()
            .filter(|(a, _)| a == archive)
            .map(|(_, state)| *state)
            .collect()
    };
    assert_eq!(states_of("a.rar"), [TargetState::Running, TargetState::Succeeded]);
    assert_eq!(states_of("b-fail.rar"), [TargetState::Running, TargetState::Failed]);

    bus.stop(Duration::from_secs(1)).await;
}
