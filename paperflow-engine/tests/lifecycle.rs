//! End-to-end lifecycle tests driving the coordinator through the public
//! API: submit, execute, retry, cancel, dead-letter, reprocess.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use paperflow_engine::{
    async_trait, Coordinator, EngineConfig, ErrorClass, HandlerRegistry, Job, JobStatus, JobType,
    ProgressReporter, RetryPolicy, SubmitRequest, TaskError, TaskHandler,
};
use serde_json::{json, Value};

/// Fast engine knobs so tests finish in milliseconds.
fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.poll_interval = Duration::from_millis(5);
    config.watchdog_interval = Duration::from_millis(20);
    config.retry_seed = Some(42);
    for policy in config.retry.values_mut() {
        policy.base = Duration::from_millis(1);
        policy.cap = Duration::from_millis(5);
    }
    config
}

fn convert_request(doc: &str) -> SubmitRequest {
    SubmitRequest {
        job_type: JobType::Convert,
        payload: json!({"documentId": doc}),
        idempotency_key: None,
        requested_by: "user-1".into(),
    }
}

/// Poll until the job satisfies `pred` or the deadline passes.
async fn wait_for(
    engine: &Coordinator,
    id: paperflow_engine::JobId,
    pred: impl Fn(&Job) -> bool,
    deadline: Duration,
) -> Job {
    let started = tokio::time::Instant::now();
    loop {
        let job = engine.get(id).await.expect("job exists");
        if pred(&job) {
            return job;
        }
        assert!(
            started.elapsed() < deadline,
            "timed out waiting for job {id}, last state: {} stage={:?} attempts={}",
            job.status,
            job.stage,
            job.attempts
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Converts succeed after reporting two stages, failing the first
/// `fail_first` attempts per document with a transient error.
struct ScriptedConvert {
    fail_first: u32,
    seen: Mutex<HashMap<String, u32>>,
}

impl ScriptedConvert {
    fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TaskHandler for ScriptedConvert {
    fn job_type(&self) -> JobType {
        JobType::Convert
    }

    async fn execute(
        &self,
        payload: Value,
        reporter: &ProgressReporter,
    ) -> Result<Value, TaskError> {
        let doc = payload
            .get("documentId")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::validation("missing_document", "documentId required"))?;

        let attempt = {
            let mut seen = self.seen.lock().expect("seen lock");
            let counter = seen.entry(doc.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        if attempt <= self.fail_first {
            return Err(TaskError::transient(
                "transient_storage",
                "storage timed out",
            ));
        }

        reporter.report("extracting", 30, None).await?;
        reporter.report("rendering", 70, None).await?;
        Ok(json!({"outputRef": format!("converted/{doc}.pdf")}))
    }
}

/// Always fails with the configured class on the first try.
struct AlwaysFails {
    job_type: JobType,
    class: ErrorClass,
}

#[async_trait]
impl TaskHandler for AlwaysFails {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _payload: Value, _reporter: &ProgressReporter) -> Result<Value, TaskError> {
        Err(TaskError::classified("scripted_failure", "scripted", self.class))
    }
}

/// Reports progress in a loop until canceled or the test gives up on it.
struct LoopsUntilCanceled;

#[async_trait]
impl TaskHandler for LoopsUntilCanceled {
    fn job_type(&self) -> JobType {
        JobType::Convert
    }

    async fn execute(
        &self,
        _payload: Value,
        reporter: &ProgressReporter,
    ) -> Result<Value, TaskError> {
        for _ in 0..1000 {
            reporter.report("working", 10, None).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(json!({"outputRef": "never"}))
    }
}

#[tokio::test]
async fn convert_job_runs_to_success_with_ordered_events() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(ScriptedConvert::new(0));
    let engine = Coordinator::start(test_config(), handlers);

    let job = engine.submit(convert_request("doc-1")).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);

    let done = wait_for(
        &engine,
        job.id,
        |j| j.status.is_terminal(),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.progress, 100);
    assert_eq!(
        done.result.as_ref().and_then(|r| r.get("outputRef")),
        Some(&json!("converted/doc-1.pdf"))
    );
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());

    let events = engine.replay(job.id).await.unwrap();
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    let stages: Vec<_> = events.iter().filter_map(|e| e.stage.as_deref()).collect();
    assert!(stages.contains(&"queued"));
    assert!(stages.contains(&"extracting"));
    assert!(stages.contains(&"rendering"));
    assert!(stages.contains(&"done"));

    engine.shutdown();
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(ScriptedConvert::new(2));
    let engine = Coordinator::start(test_config(), handlers);

    let job = engine.submit(convert_request("doc-retry")).await.unwrap();
    let done = wait_for(
        &engine,
        job.id,
        |j| j.status.is_terminal(),
        Duration::from_secs(5),
    )
    .await;

    // Two transient failures plus the final success.
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.attempts, 3);

    let events = engine.replay(job.id).await.unwrap();
    let stages: Vec<_> = events.iter().filter_map(|e| e.stage.as_deref()).collect();
    assert!(stages.contains(&"awaiting_retry"));
    assert!(stages.contains(&"retrying"));

    // Nothing terminal landed in the dead-letter store.
    let (dead, total) = engine.dead_letters(10, 0).await;
    assert!(dead.is_empty());
    assert_eq!(total, 0);

    engine.shutdown();
}

#[tokio::test]
async fn validation_failures_never_retry() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(AlwaysFails {
        job_type: JobType::Convert,
        class: ErrorClass::Validation,
    });
    let engine = Coordinator::start(test_config(), handlers);

    let job = engine.submit(convert_request("doc-bad")).await.unwrap();
    let done = wait_for(
        &engine,
        job.id,
        |j| j.status.is_terminal(),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.attempts, 1);
    let error = done.error.expect("classified error recorded");
    assert_eq!(error.class, ErrorClass::Validation);
    assert!(!error.retryable);

    engine.shutdown();
}

#[tokio::test]
async fn exhausted_retries_land_in_dead_letter_store() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(AlwaysFails {
        job_type: JobType::Convert,
        class: ErrorClass::Transient,
    });
    let mut config = test_config();
    config.retry.insert(
        JobType::Convert,
        RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            max_attempts: 3,
        },
    );
    let engine = Coordinator::start(config, handlers);

    let job = engine.submit(convert_request("doc-doomed")).await.unwrap();
    let done = wait_for(
        &engine,
        job.id,
        |j| j.status.is_terminal(),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.attempts, 3);

    let (dead, total) = engine.dead_letters(10, 0).await;
    assert_eq!(total, 1);
    let record = &dead[0];
    assert_eq!(record.job_id, job.id);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.payload, json!({"documentId": "doc-doomed"}));
    assert_eq!(
        record.last_error.as_ref().map(|e| e.code.as_str()),
        Some("scripted_failure")
    );

    engine.shutdown();
}

#[tokio::test]
async fn reprocessing_creates_a_linked_job_exactly_once() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(AlwaysFails {
        job_type: JobType::Convert,
        class: ErrorClass::Validation,
    });
    let engine = Coordinator::start(test_config(), handlers);

    let job = engine.submit(convert_request("doc-dlq")).await.unwrap();
    wait_for(
        &engine,
        job.id,
        |j| j.status == JobStatus::Failed,
        Duration::from_secs(5),
    )
    .await;

    let (dead, _) = engine.dead_letters(10, 0).await;
    let record = &dead[0];

    let replacement = engine.reprocess(record.id).await.unwrap();
    assert_eq!(replacement.parent_job_id, Some(job.id));
    assert_ne!(replacement.id, job.id);
    assert_eq!(replacement.payload, job.payload);

    let refreshed = engine.dead_letter(record.id).await.unwrap();
    assert_eq!(refreshed.reprocessed_as, Some(replacement.id));

    let again = engine.reprocess(record.id).await;
    assert!(matches!(
        again,
        Err(paperflow_engine::EngineError::AlreadyReprocessed(_, _))
    ));

    engine.shutdown();
}

#[tokio::test]
async fn idempotent_resubmission_returns_the_original_job() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(ScriptedConvert::new(0));
    let engine = Coordinator::start(test_config(), handlers);

    let request = SubmitRequest {
        idempotency_key: Some("req-123".into()),
        ..convert_request("doc-idem")
    };
    let first = engine.submit(request.clone()).await.unwrap();
    let second = engine.submit(request.clone()).await.unwrap();
    assert_eq!(first.id, second.id);

    // Same key, different payload: caller bug, rejected.
    let conflicting = SubmitRequest {
        payload: json!({"documentId": "doc-other"}),
        ..request
    };
    let err = engine.submit(conflicting).await.unwrap_err();
    assert!(matches!(
        err,
        paperflow_engine::EngineError::IdempotencyConflict { .. }
    ));

    engine.shutdown();
}

#[tokio::test]
async fn second_convert_for_the_same_document_is_rejected() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(LoopsUntilCanceled);
    let engine = Coordinator::start(test_config(), handlers);

    let first = engine.submit(convert_request("doc-busy")).await.unwrap();
    let err = engine.submit(convert_request("doc-busy")).await.unwrap_err();
    assert!(matches!(
        err,
        paperflow_engine::EngineError::ResourceBusy { .. }
    ));

    // Canceling the first frees the document for new work.
    engine.cancel(first.id).await.unwrap();
    wait_for(
        &engine,
        first.id,
        |j| j.status == JobStatus::Canceled,
        Duration::from_secs(5),
    )
    .await;
    engine.submit(convert_request("doc-busy")).await.unwrap();

    engine.shutdown();
}

#[tokio::test]
async fn ai_submissions_are_rate_limited_per_caller() {
    let handlers = HandlerRegistry::new();
    let mut config = test_config();
    config.queue.ai_burst = 1;
    config.queue.ai_rate_per_sec = 0.001;
    let engine = Coordinator::start(config, handlers);

    let request = |caller: &str| SubmitRequest {
        job_type: JobType::Ai,
        payload: json!({"prompt": "summarize"}),
        idempotency_key: None,
        requested_by: caller.into(),
    };

    engine.submit(request("alice")).await.unwrap();
    let err = engine.submit(request("alice")).await.unwrap_err();
    assert!(matches!(
        err,
        paperflow_engine::EngineError::RateLimited { .. }
    ));
    // Independent bucket per caller.
    engine.submit(request("bob")).await.unwrap();

    engine.shutdown();
}

#[tokio::test]
async fn cancel_of_a_pending_job_is_immediate() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(LoopsUntilCanceled);
    let mut config = test_config();
    config.slots.convert = 1;
    let engine = Coordinator::start(config, handlers);

    // First job occupies the only convert slot; the second stays queued.
    let running = engine.submit(convert_request("doc-a")).await.unwrap();
    wait_for(
        &engine,
        running.id,
        |j| j.status == JobStatus::Running,
        Duration::from_secs(5),
    )
    .await;
    let queued = engine.submit(convert_request("doc-b")).await.unwrap();

    let canceled = engine.cancel(queued.id).await.unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.attempts, 0);

    engine.cancel(running.id).await.unwrap();
    engine.shutdown();
}

#[tokio::test]
async fn cancel_of_a_running_job_lands_at_a_stage_boundary() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(LoopsUntilCanceled);
    let engine = Coordinator::start(test_config(), handlers);

    let job = engine.submit(convert_request("doc-cancel")).await.unwrap();
    wait_for(
        &engine,
        job.id,
        |j| j.status == JobStatus::Running && j.progress > 0,
        Duration::from_secs(5),
    )
    .await;

    engine.cancel(job.id).await.unwrap();
    let done = wait_for(
        &engine,
        job.id,
        |j| j.status.is_terminal(),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(done.status, JobStatus::Canceled);

    // Cancel of a terminal job is a logged no-op, not an error.
    let repeat = engine.cancel(job.id).await.unwrap();
    assert_eq!(repeat.status, JobStatus::Canceled);

    engine.shutdown();
}

#[tokio::test]
async fn timeout_is_a_transient_failure() {
    struct Sleeper;

    #[async_trait]
    impl TaskHandler for Sleeper {
        fn job_type(&self) -> JobType {
            JobType::Convert
        }

        async fn execute(
            &self,
            _payload: Value,
            _reporter: &ProgressReporter,
        ) -> Result<Value, TaskError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({}))
        }
    }

    let mut handlers = HandlerRegistry::new();
    handlers.register(Sleeper);
    let mut config = test_config();
    config.timeouts.convert = Duration::from_millis(30);
    config.retry.insert(
        JobType::Convert,
        RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            max_attempts: 1,
        },
    );
    let engine = Coordinator::start(config, handlers);

    let job = engine.submit(convert_request("doc-slow")).await.unwrap();
    let done = wait_for(
        &engine,
        job.id,
        |j| j.status.is_terminal(),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(
        done.error.as_ref().map(|e| e.code.as_str()),
        Some("job_timeout")
    );
    assert_eq!(
        done.error.as_ref().map(|e| e.class),
        Some(ErrorClass::Transient)
    );

    engine.shutdown();
}

#[tokio::test]
async fn progress_never_moves_backwards() {
    struct Backslider;

    #[async_trait]
    impl TaskHandler for Backslider {
        fn job_type(&self) -> JobType {
            JobType::Convert
        }

        async fn execute(
            &self,
            _payload: Value,
            reporter: &ProgressReporter,
        ) -> Result<Value, TaskError> {
            reporter.report("forward", 60, None).await?;
            reporter.report("backslide", 20, None).await?;
            Ok(json!({"outputRef": "out"}))
        }
    }

    let mut handlers = HandlerRegistry::new();
    handlers.register(Backslider);
    let engine = Coordinator::start(test_config(), handlers);

    let job = engine.submit(convert_request("doc-mono")).await.unwrap();
    wait_for(
        &engine,
        job.id,
        |j| j.status == JobStatus::Succeeded,
        Duration::from_secs(5),
    )
    .await;

    let events = engine.replay(job.id).await.unwrap();
    assert!(
        events.windows(2).all(|w| w[0].progress <= w[1].progress),
        "progress regressed in the event stream"
    );

    engine.shutdown();
}

#[tokio::test]
async fn submissions_without_a_document_id_are_rejected() {
    let handlers = HandlerRegistry::new();
    let engine = Coordinator::start(test_config(), handlers);

    let err = engine
        .submit(SubmitRequest {
            job_type: JobType::Convert,
            payload: json!({"somethingElse": true}),
            idempotency_key: None,
            requested_by: "user-1".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        paperflow_engine::EngineError::InvalidPayload(_)
    ));

    engine.shutdown();
}

#[tokio::test]
async fn overloaded_queue_sheds_new_work() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(LoopsUntilCanceled);
    let mut config = test_config();
    config.slots.convert = 1;
    config.queue.high_watermark = 1;
    config.queue.shed_window = Duration::ZERO;
    let engine = Coordinator::start(config, handlers);

    // One running, one queued: the backlog sits at the watermark.
    let running = engine.submit(convert_request("doc-1")).await.unwrap();
    wait_for(
        &engine,
        running.id,
        |j| j.status == JobStatus::Running,
        Duration::from_secs(5),
    )
    .await;
    engine.submit(convert_request("doc-2")).await.unwrap();

    let err = engine.submit(convert_request("doc-3")).await.unwrap_err();
    assert!(matches!(
        err,
        paperflow_engine::EngineError::QueueOverloaded { .. }
    ));

    engine.shutdown();
}

#[tokio::test]
async fn silent_workers_are_declared_lost() {
    struct Mute;

    #[async_trait]
    impl TaskHandler for Mute {
        fn job_type(&self) -> JobType {
            JobType::Convert
        }

        async fn execute(
            &self,
            _payload: Value,
            _reporter: &ProgressReporter,
        ) -> Result<Value, TaskError> {
            // Never reports, never returns within the test window.
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({}))
        }
    }

    let mut handlers = HandlerRegistry::new();
    handlers.register(Mute);
    let mut config = test_config();
    config.timeouts.convert = Duration::from_secs(60);
    config.timeouts.liveness = Duration::from_millis(50);
    config.watchdog_interval = Duration::from_millis(20);
    config.retry.insert(
        JobType::Convert,
        RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            max_attempts: 1,
        },
    );
    let engine = Coordinator::start(config, handlers);

    let job = engine.submit(convert_request("doc-mute")).await.unwrap();
    let done = wait_for(
        &engine,
        job.id,
        |j| j.status.is_terminal(),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(
        done.error.as_ref().map(|e| e.code.as_str()),
        Some("worker_lost")
    );
    assert_eq!(
        done.error.as_ref().map(|e| e.class),
        Some(ErrorClass::WorkerLost)
    );

    engine.shutdown();
}

#[tokio::test]
async fn subscribe_streams_snapshot_then_live_events() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(ScriptedConvert::new(0));
    let mut config = test_config();
    config.slots.convert = 1;
    let engine = Coordinator::start(config, handlers);

    let job = engine.submit(convert_request("doc-sub")).await.unwrap();
    let (snapshot, mut rx) = engine.subscribe(job.id).await.unwrap();
    assert!(!snapshot.is_empty(), "enqueue event is part of the snapshot");

    // The live tail continues exactly where the snapshot stopped.
    let last_seq = snapshot.last().map(|e| e.seq).unwrap_or(0);
    let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("live event before deadline")
        .expect("channel open");
    assert_eq!(next.job_id, job.id);
    assert!(next.seq > last_seq);

    // Unknown jobs get an error, not a silent stream.
    let err = engine.subscribe(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, paperflow_engine::EngineError::NotFound(_)));

    engine.shutdown();
}
