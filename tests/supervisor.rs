// tests/supervisor.rs
#![cfg(unix)]

use watchrun_test_utils::fakes::RecordingReporter;
use watchrun_test_utils::{init_tracing, wait_until, with_timeout};

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use watchrun::engine::RuntimeEvent;
use watchrun::errors::{ProcessStartError, ShutdownTimeout};
use watchrun::exec::{ProcessSpec, ProcessSupervisor};
use watchrun::report::{Reporter, Stream};
use watchrun::types::{ProcessExit, StopOutcome};

type TestResult = Result<(), Box<dyn Error>>;

const SH: &str = "/bin/sh";

/// Write `body` as a script and return a spec that runs it through `sh`.
/// Scripts are never exec'd directly, which keeps "text file busy" races
/// out of parallel tests.
fn script_spec(dir: &Path, name: &str, body: &str, extra_args: &[&str]) -> ProcessSpec {
    let script = dir.join(name);
    std::fs::write(&script, body).expect("write script");

    let mut args = vec![script.to_string_lossy().into_owned()];
    args.extend(extra_args.iter().map(|a| a.to_string()));

    ProcessSpec {
        root: dir.to_path_buf(),
        args,
        env: BTreeMap::new(),
        stop_timeout: Duration::from_secs(2),
        startup_grace: Duration::from_millis(150),
    }
}

fn supervisor(
    spec: ProcessSpec,
) -> (
    ProcessSupervisor,
    mpsc::Receiver<RuntimeEvent>,
    Arc<RecordingReporter>,
) {
    let (tx, rx) = mpsc::channel(8);
    let reporter = RecordingReporter::new();
    let sup = ProcessSupervisor::new(spec, tx, reporter.clone() as Arc<dyn Reporter>);
    (sup, rx, reporter)
}

#[tokio::test]
async fn start_forwards_output_and_stop_is_graceful() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let spec = script_spec(
        dir.path(),
        "serve.sh",
        "echo hello\necho oops >&2\nexec sleep 30\n",
        &[],
    );
    let (mut sup, _rx, reporter) = supervisor(spec);

    let info = with_timeout(sup.start(3, Path::new(SH))).await?;
    assert_eq!(info.seq, 3);
    assert_eq!(sup.current(), Some(info));

    assert!(wait_until(Duration::from_secs(2), || reporter.output().len() == 2).await);
    let output = reporter.output();
    assert!(output.contains(&(3, Stream::Stdout, "hello".to_string())));
    assert!(output.contains(&(3, Stream::Stderr, "oops".to_string())));

    let outcome = with_timeout(sup.stop()).await;
    assert_eq!(
        outcome,
        StopOutcome::Graceful {
            pid: info.pid,
            exit: ProcessExit {
                code: None,
                signal: Some(15)
            }
        }
    );
    assert_eq!(sup.current(), None);
    assert_eq!(with_timeout(sup.stop()).await, StopOutcome::NotRunning);
    Ok(())
}

#[tokio::test]
async fn process_ignoring_sigterm_is_force_killed() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let mut spec = script_spec(
        dir.path(),
        "stubborn.sh",
        "trap '' TERM\nwhile true; do sleep 0.05; done\n",
        &[],
    );
    spec.stop_timeout = Duration::from_millis(200);
    let (mut sup, _rx, _reporter) = supervisor(spec);

    let info = with_timeout(sup.start(1, Path::new(SH))).await?;
    let outcome = with_timeout(sup.stop()).await;

    assert_eq!(
        outcome,
        StopOutcome::Forced(ShutdownTimeout {
            pid: info.pid,
            timeout: Duration::from_millis(200),
        })
    );
    Ok(())
}

#[tokio::test]
async fn exit_within_startup_grace_is_a_start_error() -> TestResult {
    let dir = TempDir::new()?;
    let spec = script_spec(dir.path(), "crash.sh", "echo 'bind failed' >&2\nexit 4\n", &[]);
    let (mut sup, _rx, _reporter) = supervisor(spec);

    let err = with_timeout(sup.start(2, Path::new(SH)))
        .await
        .expect_err("start should fail");
    assert_eq!(
        err,
        ProcessStartError::ExitedDuringStartup {
            artifact: PathBuf::from(SH),
            exit: ProcessExit {
                code: Some(4),
                signal: None
            },
        }
    );
    assert_eq!(sup.current(), None);

    // The supervisor stays usable.
    let dir2 = TempDir::new()?;
    let ok_spec = script_spec(dir2.path(), "ok.sh", "exec sleep 30\n", &[]);
    let (mut sup, _rx, _reporter) = supervisor(ok_spec);
    let info = with_timeout(sup.start(3, Path::new(SH))).await?;
    assert_eq!(info.seq, 3);
    with_timeout(sup.stop()).await;
    Ok(())
}

#[tokio::test]
async fn missing_artifact_is_a_spawn_error() -> TestResult {
    let dir = TempDir::new()?;
    let spec = script_spec(dir.path(), "unused.sh", "", &[]);
    let (mut sup, _rx, _reporter) = supervisor(spec);

    let missing = dir.path().join("does-not-exist");
    let err = with_timeout(sup.start(1, &missing))
        .await
        .expect_err("spawn should fail");
    assert!(matches!(err, ProcessStartError::Spawn { ref artifact, .. } if artifact == &missing));
    Ok(())
}

#[tokio::test]
async fn natural_exit_is_reported_to_the_runtime() -> TestResult {
    let dir = TempDir::new()?;
    let spec = script_spec(dir.path(), "short.sh", "sleep 0.4\nexit 2\n", &[]);
    let (mut sup, mut rx, _reporter) = supervisor(spec);

    let info = with_timeout(sup.start(5, Path::new(SH))).await?;

    let event = with_timeout(rx.recv()).await.ok_or("channel closed")?;
    match event {
        RuntimeEvent::ProcessExited { seq, pid, exit } => {
            assert_eq!(seq, 5);
            assert_eq!(pid, info.pid);
            assert_eq!(exit.code, Some(2));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Stopping an already exited process is a no-op.
    assert_eq!(with_timeout(sup.stop()).await, StopOutcome::NotRunning);
    Ok(())
}

#[tokio::test]
async fn args_env_and_working_directory_are_applied() -> TestResult {
    let dir = TempDir::new()?;
    let mut spec = script_spec(
        dir.path(),
        "greet.sh",
        "echo \"$1 $GREETING\"\npwd\nexec sleep 30\n",
        &["world"],
    );
    spec.env.insert("GREETING".to_string(), "hi".to_string());
    let (mut sup, _rx, reporter) = supervisor(spec);

    with_timeout(sup.start(1, Path::new(SH))).await?;
    assert!(wait_until(Duration::from_secs(2), || reporter.output().len() == 2).await);

    let lines = reporter.output_lines();
    assert_eq!(lines[0], "world hi");
    assert_eq!(
        std::fs::canonicalize(&lines[1])?,
        std::fs::canonicalize(dir.path())?
    );

    with_timeout(sup.stop()).await;
    Ok(())
}

#[tokio::test]
async fn restart_keeps_a_single_process() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let spec = script_spec(dir.path(), "serve.sh", "exec sleep 30\n", &[]);
    let (mut sup, _rx, _reporter) = supervisor(spec);

    let first = with_timeout(sup.start(1, Path::new(SH))).await?;
    let (stopped, started) = with_timeout(sup.restart(2, Path::new(SH))).await;
    let second = started?;

    assert!(matches!(stopped, StopOutcome::Graceful { pid, .. } if pid == first.pid));
    assert_ne!(first.pid, second.pid);
    assert_eq!(sup.current(), Some(second));

    // Starting again without an explicit stop still replaces the process.
    let third = with_timeout(sup.start(3, Path::new(SH))).await?;
    assert_eq!(sup.current(), Some(third));

    with_timeout(sup.stop()).await;
    Ok(())
}

/// True while `pid` exists and is not a zombie waiting to be reaped.
fn process_alive(pid: i32) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State is the first field after the parenthesised command name.
        return stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z');
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

async fn background_pid(dir: &Path) -> Result<i32, Box<dyn Error>> {
    let file = dir.join("child.pid");
    assert!(
        wait_until(Duration::from_secs(2), || {
            std::fs::read_to_string(&file).is_ok_and(|s| s.ends_with('\n'))
        })
        .await
    );
    Ok(std::fs::read_to_string(&file)?.trim().parse()?)
}

#[tokio::test]
async fn stop_takes_down_processes_the_artifact_spawned() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let spec = script_spec(
        dir.path(),
        "wrapper.sh",
        "sleep 300 &\necho $! > child.pid\nwait\n",
        &[],
    );
    let (mut sup, _rx, _reporter) = supervisor(spec);

    with_timeout(sup.start(1, Path::new(SH))).await?;
    let child = background_pid(dir.path()).await?;
    assert!(process_alive(child));

    let outcome = with_timeout(sup.stop()).await;
    assert!(matches!(outcome, StopOutcome::Graceful { .. }), "{outcome:?}");
    assert!(wait_until(Duration::from_secs(2), || !process_alive(child)).await);
    Ok(())
}

#[tokio::test]
async fn children_ignoring_sigterm_are_killed_with_the_artifact() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let spec = script_spec(
        dir.path(),
        "wrapper.sh",
        "(trap '' TERM; exec sleep 300) &\necho $! > child.pid\nwait\n",
        &[],
    );
    let (mut sup, _rx, _reporter) = supervisor(spec);

    with_timeout(sup.restart(1, Path::new(SH))).await.1?;
    let child = background_pid(dir.path()).await?;

    with_timeout(sup.stop()).await;
    assert!(wait_until(Duration::from_secs(2), || !process_alive(child)).await);
    Ok(())
}
