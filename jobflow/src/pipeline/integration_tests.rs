//! End-to-end tests for job execution.

use crate::cancellation::KillSource;
use crate::config::ExecutionConfig;
use crate::context::{ExecutionContext, ProcessResult};
use crate::core::{JobState, JobStatus};
use crate::errors::AgentError;
use crate::events::ExecutionEvent;
use crate::pipeline::{JobExecutionStateMachine, StateDescriptor, StateTable};
use crate::stages::{
    FinalStatusStage, FnStage, HandleErrorStage, MockJobStatusService, StageFailure,
};
use crate::testing::{
    assert_aborted_in, assert_all_states_visited, assert_clean_run, assert_states_attempted,
    Outcome, RecordedAttempt, RecordingStage, ScriptedStage, SlowStage, TestPipeline,
};
use mockall::predicate::eq;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn delays(events: &[ExecutionEvent]) -> Vec<u128> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::DelayedRetry { delay, .. } => Some(delay.as_millis()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_all_stages_succeed() {
    let (ctx, collector) = TestPipeline::new().run().await.unwrap();

    assert_all_states_visited(&collector);
    assert_clean_run(&ctx);
    assert_eq!(collector.count("state-entered"), 9);
    assert_eq!(collector.count("state-exited"), 9);
    assert_eq!(collector.count("state-machine-started"), 1);
    assert_eq!(collector.count("state-machine-stopped"), 1);
    assert_eq!(collector.count("delayed-retry"), 0);
    assert_eq!(collector.count("fatal-exception"), 0);

    let names = collector.names();
    assert_eq!(names.first(), Some(&"state-machine-started"));
    assert_eq!(names.last(), Some(&"state-machine-stopped"));
    assert_eq!(ctx.current_state(), JobState::Done);
}

#[tokio::test]
async fn test_kill_before_run_only_runs_tail() {
    let (machine, collector) = TestPipeline::new().build().unwrap();
    assert!(machine.kill(KillSource::UserRequest));

    let ctx = machine.run().await.unwrap();

    assert_states_attempted(&collector, &[JobState::Cleanup, JobState::Shutdown]);
    assert_eq!(
        collector.states_for("state-skipped"),
        vec![
            JobState::Initialize,
            JobState::Configure,
            JobState::ResolveSpec,
            JobState::Setup,
            JobState::Launch,
            JobState::Monitor,
            JobState::HandleError,
        ]
    );
    assert_all_states_visited(&collector);
    assert!(ctx.is_killed());
    assert!(ctx.execution_aborted_error().is_none());
    assert_eq!(ctx.current_state(), JobState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_exhausts_budget_with_linear_backoff() {
    let resolve = Arc::new(ScriptedStage::always(
        "resolve",
        Outcome::retryable("server unavailable"),
    ));
    let started = tokio::time::Instant::now();

    let (ctx, collector) = TestPipeline::new()
        .stage(JobState::ResolveSpec, resolve.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(resolve.attempts(), 4);
    assert_eq!(delays(&collector.events()), vec![250, 500, 750]);
    assert!(started.elapsed() >= Duration::from_millis(1500));

    assert_aborted_in(&ctx, JobState::ResolveSpec);
    let error = ctx.execution_aborted_error().unwrap();
    assert_eq!(
        error.message,
        "No attempts left for retryable error in state RESOLVE_SPEC"
    );
    assert_eq!(ctx.transition_errors().len(), 4);

    assert_states_attempted(
        &collector,
        &[
            JobState::Initialize,
            JobState::Configure,
            JobState::ResolveSpec,
            JobState::Cleanup,
            JobState::HandleError,
            JobState::Shutdown,
        ],
    );
}

#[tokio::test]
async fn test_fatal_in_non_critical_state_does_not_abort() {
    let cleanup = Arc::new(ScriptedStage::always("cleanup", Outcome::fatal("rm failed")));
    let shutdown = Arc::new(ScriptedStage::succeeding("shutdown"));

    let (ctx, collector) = TestPipeline::new()
        .stage(JobState::Cleanup, cleanup.clone())
        .stage(JobState::Shutdown, shutdown.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(cleanup.attempts(), 1);
    assert_eq!(shutdown.attempts(), 1);
    assert!(!ctx.is_execution_aborted());
    assert_eq!(ctx.transition_errors().len(), 1);
    assert_eq!(ctx.transition_errors()[0].state, JobState::Cleanup);
    assert_eq!(collector.count("fatal-exception"), 1);
    assert_eq!(collector.count("execution-aborted"), 0);
    assert_eq!(collector.states_for("state-skipped"), vec![JobState::HandleError]);
}

#[tokio::test]
async fn test_fatal_in_critical_state_aborts_and_runs_tail() {
    let setup = Arc::new(ScriptedStage::always("setup", Outcome::fatal("disk full")));
    let launch = Arc::new(ScriptedStage::succeeding("launch"));

    let (ctx, collector) = TestPipeline::new()
        .stage(JobState::Setup, setup.clone())
        .stage(JobState::Launch, launch.clone())
        .run()
        .await
        .unwrap();

    assert_aborted_in(&ctx, JobState::Setup);
    assert_eq!(ctx.execution_aborted_error().unwrap().message, "disk full");
    assert_eq!(launch.attempts(), 0);
    assert_eq!(
        collector.states_for("state-skipped"),
        vec![JobState::Launch, JobState::Monitor]
    );
    assert_states_attempted(
        &collector,
        &[
            JobState::Initialize,
            JobState::Configure,
            JobState::ResolveSpec,
            JobState::Setup,
            JobState::Cleanup,
            JobState::HandleError,
            JobState::Shutdown,
        ],
    );
    assert_eq!(collector.count("execution-aborted"), 1);
    assert_eq!(collector.count("fatal-exception"), 1);
    assert_eq!(collector.count("state-machine-stopped"), 1);
}

#[tokio::test]
async fn test_abort_is_monotonic_across_stages() {
    let log = Arc::new(Mutex::new(Vec::<RecordedAttempt>::new()));
    let mut pipeline = TestPipeline::new().stage(
        JobState::Configure,
        Arc::new(FnStage::new("configure", |ctx: &mut ExecutionContext| {
            ctx.kill_handle().kill(KillSource::SystemSignal);
            ctx.kill_handle().kill(KillSource::UserRequest);
            Ok(())
        })),
    );
    for state in [JobState::Cleanup, JobState::Shutdown] {
        pipeline = pipeline.stage(state, Arc::new(RecordingStage::new(state.as_str(), log.clone())));
    }

    let (ctx, _collector) = pipeline.run().await.unwrap();

    let recorded = log.lock().clone();
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|attempt| attempt.aborted));
    assert!(ctx.is_execution_aborted());
    assert_eq!(ctx.kill_source(), Some(KillSource::SystemSignal));
}

#[tokio::test(start_paused = true)]
async fn test_kill_from_another_task_waits_for_attempt() {
    let (machine, collector) = TestPipeline::new()
        .stage(
            JobState::Launch,
            Arc::new(SlowStage::new("launch", Duration::from_secs(5))),
        )
        .build()
        .unwrap();
    let machine = Arc::new(machine);
    let handle = machine.kill_handle();

    let runner = tokio::spawn({
        let machine = machine.clone();
        async move { machine.run().await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handle.kill(KillSource::UserRequest));

    let ctx = runner.await.unwrap().unwrap();

    assert_states_attempted(
        &collector,
        &[
            JobState::Initialize,
            JobState::Configure,
            JobState::ResolveSpec,
            JobState::Setup,
            JobState::Launch,
            JobState::Cleanup,
            JobState::Shutdown,
        ],
    );
    assert_eq!(collector.states_for("state-skipped"), vec![JobState::Monitor, JobState::HandleError]);
    assert!(ctx.is_killed());
}

#[tokio::test]
async fn test_retry_budget_from_config() {
    let setup = Arc::new(ScriptedStage::always("setup", Outcome::retryable("lock held")));

    let (ctx, collector) = TestPipeline::new()
        .config(
            ExecutionConfig::new()
                .with_retry_delay_step_ms(0)
                .with_state_retries(JobState::Setup, 2),
        )
        .stage(JobState::Setup, setup.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(setup.attempts(), 3);
    assert_eq!(collector.count("delayed-retry"), 2);
    let records: Vec<u32> = ctx.transition_errors().iter().map(|r| r.attempt).collect();
    assert_eq!(records, vec![1, 2, 3]);
    assert_aborted_in(&ctx, JobState::Setup);
}

#[tokio::test]
async fn test_retry_then_success() {
    let resolve = Arc::new(ScriptedStage::new(
        "resolve",
        vec![Outcome::retryable("timeout"), Outcome::Succeed],
    ));

    let (ctx, collector) = TestPipeline::new()
        .config(ExecutionConfig::new().with_retry_delay_step_ms(1))
        .stage(JobState::ResolveSpec, resolve.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(resolve.attempts(), 2);
    assert!(!ctx.is_execution_aborted());
    assert_eq!(ctx.transition_errors().len(), 1);
    assert_eq!(collector.count("fatal-exception"), 0);
}

#[tokio::test]
async fn test_first_critical_abort_wins() {
    let mut setup = StateDescriptor::new(JobState::Setup);
    setup.critical = true;
    let mut launch = StateDescriptor::new(JobState::Launch);
    launch.critical = true;
    let table = StateTable::from_descriptors([setup, launch]).unwrap();

    let (ctx, collector) = TestPipeline::new()
        .table(table)
        .stage(
            JobState::Setup,
            Arc::new(ScriptedStage::always("setup", Outcome::fatal("first"))),
        )
        .stage(
            JobState::Launch,
            Arc::new(ScriptedStage::always("launch", Outcome::fatal("second"))),
        )
        .run()
        .await
        .unwrap();

    assert_aborted_in(&ctx, JobState::Setup);
    assert_eq!(ctx.execution_aborted_error().unwrap().message, "first");
    assert_eq!(collector.count("execution-aborted"), 1);
    assert_eq!(collector.count("fatal-exception"), 2);
    assert_eq!(ctx.transition_errors().len(), 2);
}

#[tokio::test]
async fn test_run_twice_is_rejected() {
    let (machine, collector) = TestPipeline::new().build().unwrap();

    machine.run().await.unwrap();
    let err = machine.run().await.unwrap_err();

    assert!(matches!(err, AgentError::AlreadyStarted));
    assert_eq!(collector.count("state-machine-started"), 1);
}

#[tokio::test]
async fn test_history_counts_every_failed_attempt() {
    let (ctx, collector) = TestPipeline::new()
        .config(ExecutionConfig::new().with_retry_delay_step_ms(0))
        .stage(
            JobState::ResolveSpec,
            Arc::new(ScriptedStage::new(
                "resolve",
                vec![
                    Outcome::retryable("a"),
                    Outcome::retryable("b"),
                    Outcome::Succeed,
                ],
            )),
        )
        .stage(
            JobState::Cleanup,
            Arc::new(ScriptedStage::always("cleanup", Outcome::fatal("c"))),
        )
        .stage(
            JobState::Shutdown,
            Arc::new(ScriptedStage::new(
                "shutdown",
                vec![Outcome::retryable("d"), Outcome::Succeed],
            )),
        )
        .run()
        .await
        .unwrap();

    let failed_attempts = collector
        .events()
        .iter()
        .filter(|event| matches!(event, ExecutionEvent::AfterAttempt { failure: Some(_), .. }))
        .count();
    assert_eq!(failed_attempts, 4);
    assert_eq!(ctx.transition_errors().len(), failed_attempts);

    let messages: Vec<String> = ctx
        .transition_errors()
        .iter()
        .map(|record| record.failure.to_string())
        .collect();
    assert_eq!(messages, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_panicking_stage_is_unhandled_fatal() {
    let (ctx, collector) = TestPipeline::new()
        .stage(
            JobState::Launch,
            Arc::new(ScriptedStage::always("launch", Outcome::Panic("boom".into()))),
        )
        .run()
        .await
        .unwrap();

    assert_aborted_in(&ctx, JobState::Launch);
    assert_eq!(
        ctx.execution_aborted_error().unwrap().message,
        "Unhandled error in state LAUNCH: stage panicked: boom"
    );
    assert_eq!(ctx.transition_errors()[0].failure.kind(), "unexpected");
    assert_eq!(collector.count("state-machine-stopped"), 1);
}

#[tokio::test]
async fn test_unexpected_error_is_never_retried() {
    let resolve = Arc::new(ScriptedStage::always(
        "resolve",
        Outcome::Unexpected("parse error".into()),
    ));

    let (ctx, collector) = TestPipeline::new()
        .stage(JobState::ResolveSpec, resolve.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(resolve.attempts(), 1);
    assert_eq!(collector.count("delayed-retry"), 0);
    assert_eq!(
        ctx.execution_aborted_error().unwrap().message,
        "Unhandled error in state RESOLVE_SPEC: parse error"
    );
}

#[tokio::test(start_paused = true)]
async fn test_kill_interrupts_backoff_and_abandons_skippable_state() {
    let resolve = Arc::new(ScriptedStage::always("resolve", Outcome::retryable("503")));
    let (machine, collector) = TestPipeline::new()
        .stage(JobState::ResolveSpec, resolve.clone())
        .build()
        .unwrap();
    let machine = Arc::new(machine);
    let handle = machine.kill_handle();
    let started = tokio::time::Instant::now();

    let runner = tokio::spawn({
        let machine = machine.clone();
        async move { machine.run().await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.kill(KillSource::Timeout);
    let ctx = runner.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(resolve.attempts(), 1);
    assert_eq!(delays(&collector.events()), vec![250]);
    assert!(collector
        .states_for("state-skipped")
        .contains(&JobState::ResolveSpec));
    assert!(ctx.execution_aborted_error().is_none());
    assert_eq!(collector.count("fatal-exception"), 0);
}

#[tokio::test]
async fn test_non_skippable_state_keeps_retrying_after_kill() {
    let shutdown = Arc::new(ScriptedStage::new(
        "shutdown",
        vec![Outcome::retryable("flush failed"), Outcome::Succeed],
    ));

    let (ctx, _collector) = TestPipeline::new()
        .config(ExecutionConfig::new().with_retry_delay_step_ms(0))
        .stage(
            JobState::Cleanup,
            Arc::new(FnStage::new("cleanup", |ctx: &mut ExecutionContext| {
                ctx.kill_handle().kill(KillSource::FilesLimit);
                Ok(())
            })),
        )
        .stage(JobState::Shutdown, shutdown.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(shutdown.attempts(), 2);
    assert!(ctx.is_killed());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_still_sleeps_in_tail_states_after_kill() {
    let shutdown = Arc::new(ScriptedStage::new(
        "shutdown",
        vec![
            Outcome::retryable("flush failed"),
            Outcome::retryable("flush failed"),
            Outcome::retryable("flush failed"),
            Outcome::Succeed,
        ],
    ));
    let (machine, collector) = TestPipeline::new()
        .stage(JobState::Shutdown, shutdown.clone())
        .build()
        .unwrap();
    assert!(machine.kill(KillSource::UserRequest));
    let started = tokio::time::Instant::now();

    let ctx = machine.run().await.unwrap();

    assert_eq!(shutdown.attempts(), 4);
    assert_eq!(delays(&collector.events()), vec![250, 500, 750]);
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(collector.count("fatal-exception"), 0);
    assert!(ctx.is_killed());
}

#[tokio::test]
async fn test_attempts_left_reset_per_state() {
    let log = Arc::new(Mutex::new(Vec::<RecordedAttempt>::new()));

    TestPipeline::new()
        .stage(
            JobState::ResolveSpec,
            Arc::new(RecordingStage::new("resolve", log.clone())),
        )
        .stage(
            JobState::Setup,
            Arc::new(RecordingStage::new("setup", log.clone())),
        )
        .run()
        .await
        .unwrap();

    let recorded = log.lock().clone();
    assert_eq!(recorded[0].state, JobState::ResolveSpec);
    assert_eq!(recorded[0].attempts_left, 3);
    assert_eq!(recorded[1].state, JobState::Setup);
    assert_eq!(recorded[1].attempts_left, 0);
}

fn job_pipeline(service: MockJobStatusService, launch: Arc<dyn crate::stages::Stage>) -> JobExecutionStateMachine {
    let table = Arc::new(StateTable::default());
    let mut ctx = ExecutionContext::new();
    ctx.reserved_job_id = Some("job-7".to_string());
    ctx.current_job_status = JobStatus::Running;

    JobExecutionStateMachine::builder()
        .table(table.clone())
        .stage_arc(JobState::Launch, launch)
        .stage(JobState::HandleError, HandleErrorStage::new(table.clone()))
        .stage(
            JobState::Shutdown,
            FinalStatusStage::new(Arc::new(service), table),
        )
        .build(ctx)
        .unwrap()
}

#[tokio::test]
async fn test_final_status_after_successful_job() {
    let mut service = MockJobStatusService::new();
    service
        .expect_change_job_status()
        .with(
            eq("job-7"),
            eq(JobStatus::Running),
            eq(JobStatus::Succeeded),
            eq("Job finished successfully"),
        )
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    let launch = Arc::new(FnStage::new("launch", |ctx: &mut ExecutionContext| {
        ctx.job_launched = true;
        ctx.process_result = Some(ProcessResult::from_exit_code(0));
        Ok(())
    }));

    let ctx = job_pipeline(service, launch).run().await.unwrap();
    assert_eq!(ctx.current_job_status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_final_status_after_critical_failure() {
    let mut service = MockJobStatusService::new();
    service
        .expect_change_job_status()
        .with(
            eq("job-7"),
            eq(JobStatus::Running),
            eq(JobStatus::Failed),
            eq("Failed to launch job"),
        )
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    let launch = Arc::new(FnStage::new("launch", |_ctx: &mut ExecutionContext| {
        Err(StageFailure::fatal("exec format error"))
    }));

    let ctx = job_pipeline(service, launch).run().await.unwrap();
    assert_eq!(ctx.current_job_status, JobStatus::Failed);
    assert_aborted_in(&ctx, JobState::Launch);
}

#[tokio::test]
async fn test_final_status_retried_on_transient_error() {
    let mut service = MockJobStatusService::new();
    let mut calls = 0;
    service
        .expect_change_job_status()
        .times(2)
        .returning(move |_, _, _, _| {
            calls += 1;
            if calls == 1 {
                Err(crate::errors::StatusServiceError::Transient("503".into()))
            } else {
                Ok(())
            }
        });

    let launch = Arc::new(ScriptedStage::succeeding("launch"));
    let machine = job_pipeline(service, launch);

    let ctx = tokio::time::timeout(Duration::from_secs(5), machine.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctx.current_job_status, JobStatus::Succeeded);
    assert_eq!(ctx.transition_errors().len(), 1);
    assert_eq!(ctx.transition_errors()[0].state, JobState::Shutdown);
}
