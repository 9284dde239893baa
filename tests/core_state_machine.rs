// tests/core_state_machine.rs

use std::path::PathBuf;
use std::time::Duration;

use proptest::prelude::*;

use watchrun::engine::{CoreCommand, CoreOptions, CoreRuntime, CoreStep, ExitReason, RuntimeEvent};
use watchrun::errors::{BuildError, ProcessStartError, WatchError};
use watchrun::report::StatusUpdate;
use watchrun::types::{
    BuildOutcome, BuildOutput, BuildResult, BuildSeq, ChangeEvent, ChangeKind, ProcessExit,
    ProcessInfo, StopOutcome, SupervisorState, TriggerReason, TriggerWhileBuildingBehaviour,
};

fn options(behaviour: TriggerWhileBuildingBehaviour) -> CoreOptions {
    CoreOptions {
        while_building: behaviour,
        keep_running_during_build: false,
        debounce: Duration::from_millis(200),
    }
}

fn queue_core() -> CoreRuntime {
    CoreRuntime::new(options(TriggerWhileBuildingBehaviour::Queue))
}

fn changed(path: &str) -> RuntimeEvent {
    RuntimeEvent::FileChanged(ChangeEvent::new(path, ChangeKind::Modified))
}

/// Push `paths` through the debouncer and fire the newest timer.
fn trigger(core: &mut CoreRuntime, paths: &[&str]) -> CoreStep {
    let mut generation = 0;
    for path in paths {
        let step = core.step(changed(path));
        match step.commands.as_slice() {
            [CoreCommand::ArmDebounce { generation: g, .. }] => generation = *g,
            other => panic!("expected a single ArmDebounce, got {other:?}"),
        }
    }
    core.step(RuntimeEvent::DebounceElapsed { generation })
}

fn result(seq: BuildSeq, outcome: BuildOutcome, stderr: &str) -> RuntimeEvent {
    RuntimeEvent::BuildFinished(BuildResult {
        seq,
        outcome,
        output: BuildOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
        },
        duration: Duration::from_millis(5),
    })
}

fn success(seq: BuildSeq) -> RuntimeEvent {
    result(
        seq,
        BuildOutcome::Succeeded {
            artifact: PathBuf::from(format!("bin-{seq}")),
        },
        "",
    )
}

fn started_builds(step: &CoreStep) -> Vec<BuildSeq> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::StartBuild(job) => Some(job.seq),
            _ => None,
        })
        .collect()
}

fn count(step: &CoreStep, pred: impl Fn(&CoreCommand) -> bool) -> usize {
    step.commands.iter().filter(|c| pred(c)).count()
}

fn is_stop(c: &CoreCommand) -> bool {
    matches!(c, CoreCommand::StopProcess)
}

/// Trigger, build successfully and bring the process up as pid `pid`.
fn reach_running(core: &mut CoreRuntime, pid: u32) -> BuildSeq {
    let step = trigger(core, &["src/main.rs"]);
    let seq = started_builds(&step)[0];
    core.step(success(seq));
    core.step(RuntimeEvent::ProcessStarted(ProcessInfo { seq, pid }));
    assert_eq!(core.state(), SupervisorState::Running);
    seq
}

#[test]
fn burst_of_changes_starts_exactly_one_build() {
    let mut core = queue_core();

    let first = core.step(changed("src/a.rs"));
    let second = core.step(changed("src/b.rs"));
    let third = core.step(changed("src/a.rs"));

    let generation_of = |step: &CoreStep| match step.commands.as_slice() {
        [CoreCommand::ArmDebounce { generation, delay }] => {
            assert_eq!(*delay, Duration::from_millis(200));
            *generation
        }
        other => panic!("unexpected commands {other:?}"),
    };
    let (g1, g2, g3) = (
        generation_of(&first),
        generation_of(&second),
        generation_of(&third),
    );

    // Stale timers do nothing.
    assert!(core.step(RuntimeEvent::DebounceElapsed { generation: g1 }).commands.is_empty());
    assert!(core.step(RuntimeEvent::DebounceElapsed { generation: g2 }).commands.is_empty());

    let step = core.step(RuntimeEvent::DebounceElapsed { generation: g3 });
    let jobs: Vec<_> = step
        .commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::StartBuild(job) => Some(job.clone()),
            _ => None,
        })
        .collect();

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].seq, 1);
    assert_eq!(jobs[0].reason, TriggerReason::FileChange);
    assert_eq!(
        jobs[0].paths,
        vec![PathBuf::from("src/a.rs"), PathBuf::from("src/b.rs")]
    );
    assert_eq!(core.state(), SupervisorState::Building);

    // Firing the same timer twice does not start another build.
    assert!(core.step(RuntimeEvent::DebounceElapsed { generation: g3 }).commands.is_empty());
}

#[test]
fn successful_build_walks_idle_building_starting_running() {
    let mut core = queue_core();
    assert_eq!(core.state(), SupervisorState::Idle);

    let step = trigger(&mut core, &["src/main.rs"]);
    assert_eq!(started_builds(&step), vec![1]);
    assert_eq!(core.state(), SupervisorState::Building);
    assert_eq!(core.in_flight(), Some(1));

    let step = core.step(success(1));
    assert_eq!(core.state(), SupervisorState::Starting);
    assert_eq!(count(&step, is_stop), 0);
    assert!(step.commands.contains(&CoreCommand::StartProcess {
        seq: 1,
        artifact: PathBuf::from("bin-1"),
    }));
    assert!(step.commands.contains(&CoreCommand::Report(StatusUpdate::StateChanged {
        from: SupervisorState::Building,
        to: SupervisorState::Starting,
    })));

    let step = core.step(RuntimeEvent::ProcessStarted(ProcessInfo { seq: 1, pid: 42 }));
    assert_eq!(core.state(), SupervisorState::Running);
    assert_eq!(core.live_process(), Some(ProcessInfo { seq: 1, pid: 42 }));
    assert!(step.commands.contains(&CoreCommand::Report(StatusUpdate::ProcessStarted {
        seq: 1,
        pid: 42
    })));
}

#[test]
fn edit_while_running_stops_old_process_exactly_once() {
    let mut core = queue_core();
    reach_running(&mut core, 42);

    let step = trigger(&mut core, &["src/lib.rs"]);
    assert_eq!(count(&step, is_stop), 1);
    assert_eq!(started_builds(&step), vec![2]);
    assert_eq!(core.state(), SupervisorState::Building);
    assert_eq!(core.live_process(), None);

    // The stop must be issued before the build starts.
    let stop_at = step.commands.iter().position(is_stop).unwrap();
    let build_at = step
        .commands
        .iter()
        .position(|c| matches!(c, CoreCommand::StartBuild(_)))
        .unwrap();
    assert!(stop_at < build_at);

    core.step(RuntimeEvent::ProcessStopped(StopOutcome::Graceful {
        pid: 42,
        exit: ProcessExit {
            code: None,
            signal: Some(15),
        },
    }));

    let step = core.step(success(2));
    assert_eq!(count(&step, is_stop), 0);
    assert_eq!(core.state(), SupervisorState::Starting);

    core.step(RuntimeEvent::ProcessStarted(ProcessInfo { seq: 2, pid: 43 }));
    assert_eq!(core.state(), SupervisorState::Running);
}

#[test]
fn failed_build_reports_stderr_verbatim_and_recovers_on_next_success() {
    let mut core = queue_core();
    trigger(&mut core, &["src/main.rs"]);

    let stderr = "error[E0308]: mismatched types\n --> src/main.rs:3:5\n";
    let step = core.step(result(
        1,
        BuildOutcome::Failed {
            error: BuildError::NonZeroExit(101),
        },
        stderr,
    ));

    assert_eq!(core.state(), SupervisorState::Failed);
    let failure = step
        .commands
        .iter()
        .find_map(|c| match c {
            CoreCommand::Report(StatusUpdate::BuildFailed {
                seq,
                paths,
                error,
                diagnostics,
            }) => Some((*seq, paths.clone(), error.clone(), diagnostics.clone())),
            _ => None,
        })
        .expect("BuildFailed report");
    assert_eq!(failure.0, 1);
    assert_eq!(failure.1, vec![PathBuf::from("src/main.rs")]);
    assert_eq!(failure.2, BuildError::NonZeroExit(101));
    assert_eq!(failure.3, stderr);
    assert!(!step.commands.iter().any(|c| matches!(c, CoreCommand::StartProcess { .. })));

    // Waits in Failed until the next trigger.
    let step = trigger(&mut core, &["src/main.rs"]);
    assert_eq!(started_builds(&step), vec![2]);
    assert_eq!(core.state(), SupervisorState::Building);

    core.step(success(2));
    core.step(RuntimeEvent::ProcessStarted(ProcessInfo { seq: 2, pid: 7 }));
    assert_eq!(core.state(), SupervisorState::Running);
}

#[test]
fn queue_mode_discards_superseded_success_and_builds_again() {
    let mut core = queue_core();
    trigger(&mut core, &["a.rs"]);

    let step = trigger(&mut core, &["b.rs"]);
    assert!(started_builds(&step).is_empty());
    assert_eq!(count(&step, |c| matches!(c, CoreCommand::CancelBuild { .. })), 0);
    assert!(step.commands.contains(&CoreCommand::Report(StatusUpdate::BuildQueued {
        running: 1,
        paths: vec![PathBuf::from("b.rs")],
    })));
    trigger(&mut core, &["c.rs"]);
    assert!(core.has_pending_build());

    let step = core.step(success(1));
    assert!(step
        .commands
        .contains(&CoreCommand::Report(StatusUpdate::StaleResultDiscarded { seq: 1 })));
    assert!(!step.commands.iter().any(|c| matches!(c, CoreCommand::StartProcess { .. })));

    let job = step
        .commands
        .iter()
        .find_map(|c| match c {
            CoreCommand::StartBuild(job) => Some(job.clone()),
            _ => None,
        })
        .expect("pending build started");
    assert_eq!(job.seq, 2);
    assert_eq!(job.paths, vec![PathBuf::from("b.rs"), PathBuf::from("c.rs")]);
    assert_eq!(core.state(), SupervisorState::Building);
    assert!(!core.has_pending_build());
}

#[test]
fn cancel_mode_cancels_once_and_starts_pending_after_cancellation() {
    let mut core = CoreRuntime::new(options(TriggerWhileBuildingBehaviour::Cancel));
    trigger(&mut core, &["a.rs"]);

    let first = trigger(&mut core, &["b.rs"]);
    let second = trigger(&mut core, &["c.rs"]);
    assert_eq!(
        first
            .commands
            .iter()
            .filter(|c| matches!(c, CoreCommand::CancelBuild { seq: 1 }))
            .count(),
        1
    );
    assert_eq!(count(&second, |c| matches!(c, CoreCommand::CancelBuild { .. })), 0);

    let step = core.step(result(1, BuildOutcome::Cancelled, ""));
    assert!(step
        .commands
        .contains(&CoreCommand::Report(StatusUpdate::BuildCancelled { seq: 1 })));
    assert_eq!(started_builds(&step), vec![2]);
    assert_eq!(core.in_flight(), Some(2));
}

#[test]
fn results_for_unknown_builds_are_ignored() {
    let mut core = queue_core();
    trigger(&mut core, &["a.rs"]);

    let step = core.step(success(99));
    assert!(step.commands.is_empty());
    assert_eq!(core.state(), SupervisorState::Building);
    assert_eq!(core.in_flight(), Some(1));
}

#[test]
fn cancelled_build_without_pending_trigger_returns_to_idle() {
    let mut core = queue_core();
    trigger(&mut core, &["a.rs"]);

    core.step(result(1, BuildOutcome::Cancelled, ""));
    assert_eq!(core.state(), SupervisorState::Idle);
    assert_eq!(core.in_flight(), None);
}

#[test]
fn process_start_failure_moves_to_failed_and_next_trigger_rebuilds() {
    let mut core = queue_core();
    trigger(&mut core, &["a.rs"]);
    core.step(success(1));

    let error = ProcessStartError::ExitedDuringStartup {
        artifact: PathBuf::from("bin-1"),
        exit: ProcessExit {
            code: Some(2),
            signal: None,
        },
    };
    let step = core.step(RuntimeEvent::ProcessStartFailed {
        seq: 1,
        error: error.clone(),
    });
    assert_eq!(core.state(), SupervisorState::Failed);
    assert!(step
        .commands
        .contains(&CoreCommand::Report(StatusUpdate::ProcessStartFailed { seq: 1, error })));

    let step = trigger(&mut core, &["a.rs"]);
    assert_eq!(started_builds(&step), vec![2]);
    assert_eq!(count(&step, is_stop), 0);
}

#[test]
fn process_exiting_on_its_own_moves_to_idle_or_failed() {
    let mut core = queue_core();
    let seq = reach_running(&mut core, 42);

    core.step(RuntimeEvent::ProcessExited {
        seq,
        pid: 42,
        exit: ProcessExit {
            code: Some(0),
            signal: None,
        },
    });
    assert_eq!(core.state(), SupervisorState::Idle);
    assert_eq!(core.live_process(), None);

    let mut core = queue_core();
    let seq = reach_running(&mut core, 42);
    let step = core.step(RuntimeEvent::ProcessExited {
        seq,
        pid: 42,
        exit: ProcessExit {
            code: None,
            signal: Some(9),
        },
    });
    assert_eq!(core.state(), SupervisorState::Failed);
    assert_eq!(
        count(&step, |c| matches!(
            c,
            CoreCommand::Report(StatusUpdate::ProcessExited { pid: 42, .. })
        )),
        1
    );
}

#[test]
fn exit_of_untracked_process_is_ignored() {
    let mut core = queue_core();
    reach_running(&mut core, 42);

    let step = core.step(RuntimeEvent::ProcessExited {
        seq: 1,
        pid: 7,
        exit: ProcessExit {
            code: Some(1),
            signal: None,
        },
    });
    assert!(step.commands.is_empty());
    assert_eq!(core.state(), SupervisorState::Running);
}

#[test]
fn shutdown_while_running_stops_process_and_exits_zero() {
    let mut core = queue_core();
    reach_running(&mut core, 42);

    let step = core.step(RuntimeEvent::ShutdownRequested);
    assert!(!step.keep_running);
    assert_eq!(count(&step, is_stop), 1);

    let exit = step.commands.last().cloned();
    assert_eq!(
        exit,
        Some(CoreCommand::Exit(ExitReason::Shutdown { interrupted: false }))
    );
    assert_eq!(
        ExitReason::Shutdown { interrupted: false }.exit_code(),
        Some(0)
    );
}

#[test]
fn shutdown_while_building_cancels_and_exits_130() {
    let mut core = queue_core();
    trigger(&mut core, &["a.rs"]);

    let step = core.step(RuntimeEvent::ShutdownRequested);
    assert!(!step.keep_running);
    assert!(step.commands.contains(&CoreCommand::CancelBuild { seq: 1 }));
    assert!(step
        .commands
        .contains(&CoreCommand::Exit(ExitReason::Shutdown { interrupted: true })));
    assert_eq!(
        ExitReason::Shutdown { interrupted: true }.exit_code(),
        Some(130)
    );
}

#[test]
fn shutdown_while_idle_or_failed_exits_zero() {
    let mut core = queue_core();
    let step = core.step(RuntimeEvent::ShutdownRequested);
    assert_eq!(
        step.commands.last(),
        Some(&CoreCommand::Exit(ExitReason::Shutdown { interrupted: false }))
    );
    assert_eq!(count(&step, is_stop), 0);

    let mut core = queue_core();
    trigger(&mut core, &["a.rs"]);
    core.step(result(
        1,
        BuildOutcome::Failed {
            error: BuildError::NonZeroExit(1),
        },
        "boom",
    ));
    let step = core.step(RuntimeEvent::ShutdownRequested);
    assert_eq!(
        step.commands.last(),
        Some(&CoreCommand::Exit(ExitReason::Shutdown { interrupted: false }))
    );
}

#[test]
fn watch_failure_is_fatal() {
    let mut core = queue_core();
    reach_running(&mut core, 42);

    let error = WatchError::RootInaccessible(PathBuf::from("/gone"));
    let step = core.step(RuntimeEvent::WatchFailed(error.clone()));

    assert!(!step.keep_running);
    assert_eq!(count(&step, is_stop), 1);
    assert!(step
        .commands
        .contains(&CoreCommand::Report(StatusUpdate::WatchFailed { error: error.clone() })));
    assert!(step
        .commands
        .contains(&CoreCommand::Exit(ExitReason::WatchFailed(error.clone()))));
    assert_eq!(ExitReason::WatchFailed(error).exit_code(), None);
}

#[test]
fn startup_request_builds_without_debounce() {
    let mut core = queue_core();
    let step = core.step(RuntimeEvent::BuildRequested {
        reason: TriggerReason::Startup,
    });

    let job = step
        .commands
        .iter()
        .find_map(|c| match c {
            CoreCommand::StartBuild(job) => Some(job.clone()),
            _ => None,
        })
        .expect("startup build");
    assert_eq!(job.seq, 1);
    assert_eq!(job.reason, TriggerReason::Startup);
    assert!(job.paths.is_empty());
}

#[test]
fn keep_running_during_build_defers_stop_until_restart() {
    let mut core = CoreRuntime::new(CoreOptions {
        keep_running_during_build: true,
        ..options(TriggerWhileBuildingBehaviour::Queue)
    });
    reach_running(&mut core, 42);

    let step = trigger(&mut core, &["a.rs"]);
    assert_eq!(count(&step, is_stop), 0);
    assert_eq!(core.live_process(), Some(ProcessInfo { seq: 1, pid: 42 }));

    let step = core.step(success(2));
    assert_eq!(count(&step, is_stop), 1);
    let stop_at = step.commands.iter().position(is_stop).unwrap();
    let start_at = step
        .commands
        .iter()
        .position(|c| matches!(c, CoreCommand::StartProcess { .. }))
        .unwrap();
    assert!(stop_at < start_at);
}

#[test]
fn stale_process_start_is_stopped() {
    let mut core = queue_core();
    trigger(&mut core, &["a.rs"]);
    core.step(success(1));
    // A new trigger arrives before the start is confirmed.
    trigger(&mut core, &["b.rs"]);

    let step = core.step(RuntimeEvent::ProcessStarted(ProcessInfo { seq: 1, pid: 5 }));
    assert_eq!(step.commands, vec![CoreCommand::StopProcess]);
    assert_eq!(core.state(), SupervisorState::Building);
    assert_eq!(core.live_process(), None);
}

#[derive(Debug, Clone)]
enum Op {
    Change(u8),
    Flush,
    FinishOk,
    FinishErr,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Change),
        Just(Op::Flush),
        Just(Op::FinishOk),
        Just(Op::FinishErr),
    ]
}

/// Mirrors what the runtime shell does with process commands, and checks
/// the single-process and last-trigger-wins properties on the way.
struct Harness {
    core: CoreRuntime,
    generation: u64,
    in_flight: Option<BuildSeq>,
    newest_started: BuildSeq,
    live: bool,
    next_pid: u32,
}

impl Harness {
    fn apply(&mut self, event: RuntimeEvent) {
        let mut queue = vec![event];
        while let Some(event) = queue.pop() {
            let step = self.core.step(event);
            for command in step.commands {
                match command {
                    CoreCommand::ArmDebounce { generation, .. } => self.generation = generation,
                    CoreCommand::StartBuild(job) => {
                        assert!(self.in_flight.is_none(), "two builds in flight");
                        assert!(job.seq > self.newest_started);
                        self.newest_started = job.seq;
                        self.in_flight = Some(job.seq);
                    }
                    CoreCommand::StartProcess { seq, .. } => {
                        assert!(!self.live, "process started while another is live");
                        assert_eq!(seq, self.newest_started, "ran an outdated artifact");
                        self.live = true;
                        self.next_pid += 1;
                        queue.push(RuntimeEvent::ProcessStarted(ProcessInfo {
                            seq,
                            pid: self.next_pid,
                        }));
                    }
                    CoreCommand::StopProcess => self.live = false,
                    _ => {}
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn only_the_newest_build_is_ever_run(
        ops in proptest::collection::vec(op_strategy(), 1..60),
        cancel in any::<bool>(),
    ) {
        let behaviour = if cancel {
            TriggerWhileBuildingBehaviour::Cancel
        } else {
            TriggerWhileBuildingBehaviour::Queue
        };
        let mut h = Harness {
            core: CoreRuntime::new(options(behaviour)),
            generation: 0,
            in_flight: None,
            newest_started: 0,
            live: false,
            next_pid: 100,
        };

        for op in ops {
            match op {
                Op::Change(n) => h.apply(changed(&format!("src/f{n}.rs"))),
                Op::Flush => {
                    let generation = h.generation;
                    h.apply(RuntimeEvent::DebounceElapsed { generation });
                }
                Op::FinishOk | Op::FinishErr => {
                    let Some(seq) = h.in_flight.take() else { continue };
                    let event = if matches!(op, Op::FinishOk) {
                        success(seq)
                    } else {
                        result(seq, BuildOutcome::Failed { error: BuildError::NonZeroExit(1) }, "e")
                    };
                    h.apply(event);
                }
            }
            prop_assert_eq!(h.core.in_flight(), h.in_flight);
            prop_assert_eq!(h.live, h.core.live_process().is_some());
        }
    }
}
