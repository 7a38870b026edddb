//! End-to-end orchestrator tests over mock adapters
//!
//! These drive complete pipeline definitions through the executor the way
//! the supervisor would, asserting the metric, event, hook and checkpoint
//! contracts.

use async_trait::async_trait;
use datahub_core::{
    record_from, BranchOutput, EventKind, ExecutorContext, HookContext, HookService, HookStage,
    Interceptor, LoadReport, MemoryEventBus, NewRecordError, PipelineContext, PipelineDefinition,
    PipelineExecutor, Record, RecordErrorSink, RecordFailure, RecordOutcomeFailure, ResumePoint,
    RunOutcome, StepConfig, StepDefinition, StepExecutors, StepKind, TerminalReport,
    ValidateOutcome, ValidationDrop,
};
use datahub_core::{Edge, ErrorPolicy, ParallelExecution};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

/// Adapter stand-in driven entirely by step config:
///
/// - extract: emits the configured `rows`
/// - transform: copies records, adds `transformed: true`; throws when the
///   config carries `explode`; requests cancellation when it carries
///   `cancelDuring`
/// - validate: drops records missing any field in config `required`
/// - enrich: adds `enriched: true`
/// - route: partitions on the `region` field
/// - load: per-record failure when `sku` is in `failSkus`; whole-step throw
///   on `explode`; captures loaded records per step key
/// - export/feed/sink: succeed wholesale, feed reports `outputPath`
struct TestExecutors {
    rows: Vec<Record>,
    loaded: Mutex<Vec<(String, Record)>>,
}

impl TestExecutors {
    fn new(rows: Vec<Record>) -> Self {
        Self {
            rows,
            loaded: Mutex::new(Vec::new()),
        }
    }

    fn loaded_for(&self, step_key: &str) -> Vec<Record> {
        self.loaded
            .lock()
            .iter()
            .filter(|(key, _)| key == step_key)
            .map(|(_, record)| record.clone())
            .collect()
    }

    fn loaded_count(&self) -> usize {
        self.loaded.lock().len()
    }

    fn config_strings(step: &StepDefinition, key: &str) -> Vec<String> {
        step.config
            .get(key)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepExecutors for TestExecutors {
    async fn extract(
        &self,
        _step: &StepDefinition,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<Vec<Record>> {
        Ok(self.rows.clone())
    }

    async fn transform(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        cx: &ExecutorContext,
    ) -> datahub_core::Result<Vec<Record>> {
        if step.config.get("explode").is_some() {
            return Err(datahub_core::PipelineError::executor(
                "mapping expression failed",
            ));
        }
        if step.config.get("cancelDuring").is_some() {
            cx.cancel_flag().request();
        }
        Ok(records
            .into_iter()
            .map(|mut record| {
                record.insert("transformed".to_string(), json!(true));
                record
            })
            .collect())
    }

    async fn validate(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<ValidateOutcome> {
        let required = Self::config_strings(step, "required");
        let mut outcome = ValidateOutcome::default();
        for record in records {
            match required.iter().find(|field| !record.contains_key(*field)) {
                Some(missing) => outcome.dropped.push(ValidationDrop {
                    reason: format!("missing required field {missing}"),
                    code: Some("REQUIRED".to_string()),
                    record,
                }),
                None => outcome.kept.push(record),
            }
        }
        Ok(outcome)
    }

    async fn enrich(
        &self,
        _step: &StepDefinition,
        records: Vec<Record>,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<Vec<Record>> {
        Ok(records
            .into_iter()
            .map(|mut record| {
                record.insert("enriched".to_string(), json!(true));
                record
            })
            .collect())
    }

    async fn route(
        &self,
        _step: &StepDefinition,
        records: Vec<Record>,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<BranchOutput> {
        let mut branches = BranchOutput::new();
        for record in records {
            let branch = record
                .get("region")
                .and_then(Value::as_str)
                .unwrap_or("default")
                .to_string();
            branches.entry(branch).or_default().push(record);
        }
        Ok(branches)
    }

    async fn load(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<LoadReport> {
        if step.config.get("explode").is_some() {
            return Err(datahub_core::PipelineError::executor(
                "catalog rejected the batch",
            ));
        }
        let fail_skus = Self::config_strings(step, "failSkus");
        let mut report = LoadReport::default();
        for record in records {
            let sku = record.get("sku").and_then(Value::as_str).unwrap_or("");
            if fail_skus.iter().any(|fail| fail == sku) {
                report.fail += 1;
                report.failures.push(RecordOutcomeFailure {
                    failure: RecordFailure::classify(
                        format!("slug already exists for sku {sku}"),
                        None,
                    ),
                    record,
                });
            } else {
                report.ok += 1;
                self.loaded.lock().push((step.key.clone(), record));
            }
        }
        Ok(report)
    }

    async fn export(
        &self,
        _step: &StepDefinition,
        records: Vec<Record>,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<TerminalReport> {
        Ok(TerminalReport {
            ok: records.len() as u64,
            ..TerminalReport::default()
        })
    }

    async fn feed(
        &self,
        step: &StepDefinition,
        records: Vec<Record>,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<TerminalReport> {
        Ok(TerminalReport {
            ok: records.len() as u64,
            output_path: step.config.str_field("path").map(str::to_string),
            ..TerminalReport::default()
        })
    }

    async fn sink(
        &self,
        _step: &StepDefinition,
        records: Vec<Record>,
        _cx: &ExecutorContext,
    ) -> datahub_core::Result<TerminalReport> {
        Ok(TerminalReport {
            ok: records.len() as u64,
            ..TerminalReport::default()
        })
    }
}

/// Quarantine intake double
#[derive(Default)]
struct CapturingErrorSink {
    errors: Mutex<Vec<NewRecordError>>,
}

#[async_trait]
impl RecordErrorSink for CapturingErrorSink {
    async fn report(&self, error: NewRecordError) {
        self.errors.lock().push(error);
    }
}

fn product_rows() -> Vec<Record> {
    vec![
        record_from(&[("name", json!("A")), ("sku", json!("A1")), ("price", json!("10"))]),
        record_from(&[("name", json!("B")), ("sku", json!("B1")), ("price", json!("20"))]),
        record_from(&[("name", json!("C")), ("sku", json!("C1")), ("price", json!("30"))]),
    ]
}

fn linear_import(required: &[&str]) -> PipelineDefinition {
    PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(StepDefinition::new("map", StepKind::Transform))
        .with_step(
            StepDefinition::new("check", StepKind::Validate).with_config(
                StepConfig::new().with("required", json!(required)),
            ),
        )
        .with_step(StepDefinition::new("load", StepKind::Load))
}

#[tokio::test]
async fn linear_products_import_happy_path() {
    let executors = Arc::new(TestExecutors::new(product_rows()));
    let events = Arc::new(MemoryEventBus::new());
    let executor = PipelineExecutor::new(executors.clone()).with_events(events.clone());
    let cx = ExecutorContext::new("run-1", "products-import");

    let report = executor
        .execute(&linear_import(&["sku"]), &cx)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let metrics = report.metrics;
    assert_eq!(metrics.processed, 3);
    assert_eq!(metrics.succeeded, 3);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.counters.extracted, 3);
    assert_eq!(metrics.counters.transformed, 3);
    assert_eq!(metrics.counters.validated, 3);
    assert_eq!(metrics.counters.loaded, 3);
    assert_eq!(metrics.counters.rejected, 0);
    assert_eq!(metrics.details.len(), 4);

    // Record order survives the whole chain.
    let loaded = executors.loaded_for("load");
    let skus: Vec<&str> = loaded
        .iter()
        .map(|record| record["sku"].as_str().unwrap())
        .collect();
    assert_eq!(skus, vec!["A1", "B1", "C1"]);

    // Step events bracket each step's domain event.
    let kinds = events.kinds();
    let started = kinds
        .iter()
        .position(|kind| *kind == EventKind::StepStarted)
        .unwrap();
    let extracted = kinds
        .iter()
        .position(|kind| *kind == EventKind::RecordExtracted)
        .unwrap();
    let completed = kinds
        .iter()
        .position(|kind| *kind == EventKind::StepCompleted)
        .unwrap();
    assert!(started < extracted && extracted < completed);
    assert_eq!(
        kinds
            .iter()
            .filter(|kind| **kind == EventKind::PipelineRunProgress)
            .count(),
        4
    );
}

#[tokio::test]
async fn validation_drops_quarantine_without_failing_the_run() {
    let mut rows = product_rows();
    rows[1].remove("sku");
    let executors = Arc::new(TestExecutors::new(rows));
    let sink = Arc::new(CapturingErrorSink::default());
    let executor = PipelineExecutor::new(executors.clone()).with_error_sink(sink.clone());
    let cx = ExecutorContext::new("run-2", "products-import");

    let report = executor
        .execute(&linear_import(&["sku"]), &cx)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let metrics = report.metrics;
    assert_eq!(metrics.processed, 3);
    assert_eq!(metrics.counters.validated, 2);
    assert_eq!(metrics.counters.loaded, 2);
    assert_eq!(metrics.counters.rejected, 0);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.recent_failed.len(), 1);

    let errors = sink.errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code.as_deref(), Some("REQUIRED"));
    assert!(!errors[0].recoverable);
    assert_eq!(errors[0].step_key, "check");
}

fn gated_import(count: usize) -> (PipelineDefinition, Vec<Record>) {
    let rows: Vec<Record> = (0..count)
        .map(|i| record_from(&[("sku", json!(format!("S{i}"))), ("name", json!("x"))]))
        .collect();
    let definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(StepDefinition::new("map", StepKind::Transform))
        .with_step(
            StepDefinition::new("gate", StepKind::Gate)
                .with_config(StepConfig::new().with("approvalType", json!("MANUAL"))),
        )
        .with_step(StepDefinition::new("load", StepKind::Load));
    (definition, rows)
}

#[tokio::test]
async fn gate_pause_and_resume_match_uninterrupted_metrics() {
    let (definition, rows) = gated_import(10);
    let executors = Arc::new(TestExecutors::new(rows));
    let executor = PipelineExecutor::new(executors.clone());
    let cx = ExecutorContext::new("run-3", "gated-import");

    let first = executor.execute(&definition, &cx).await.unwrap();
    assert_eq!(
        first.outcome,
        RunOutcome::Paused {
            step_key: "gate".to_string()
        }
    );
    assert!(first.metrics.paused);
    assert_eq!(first.metrics.paused_at_step.as_deref(), Some("gate"));
    assert_eq!(first.metrics.counters.gated, 0);
    assert_eq!(executors.loaded_count(), 0);

    // The checkpoint holds the full pending set.
    let gate_entry = cx
        .with_checkpoint(|checkpoint| checkpoint.take_gate("gate"))
        .unwrap()
        .expect("gate checkpoint entry");
    assert_eq!(gate_entry.pending_record_count, 10);

    // Approve: resume with the pending records, merging metrics the way the
    // supervisor does.
    let pending: Vec<Record> = gate_entry
        .pending_records
        .into_iter()
        .map(|value| value.as_object().cloned().unwrap())
        .collect();
    let second = executor
        .execute_resume(
            &definition,
            &cx,
            ResumePoint {
                step_key: "gate".to_string(),
                records: pending,
            },
        )
        .await
        .unwrap();
    assert_eq!(second.outcome, RunOutcome::Completed);

    let mut merged = first.metrics;
    merged.clear_paused();
    merged.merge(second.metrics);
    assert_eq!(merged.processed, 10);
    assert_eq!(merged.counters.extracted, 10);
    assert_eq!(merged.counters.gated, 10);
    assert_eq!(merged.counters.loaded, 10);
    assert_eq!(merged.succeeded, 10);
    assert!(!merged.paused);
    assert_eq!(executors.loaded_count(), 10);
}

fn two_branch_dag(explode_branch_a: bool, policy: ErrorPolicy) -> PipelineDefinition {
    let mut transform_a = StepDefinition::new("map-a", StepKind::Transform);
    if explode_branch_a {
        transform_a = transform_a.with_config(StepConfig::new().with("explode", json!(true)));
    }
    let mut definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(transform_a)
        .with_step(StepDefinition::new("map-b", StepKind::Transform))
        .with_step(StepDefinition::new("load-a", StepKind::Load))
        .with_step(StepDefinition::new("load-b", StepKind::Load))
        .with_edge(Edge::new("extract", "map-a"))
        .with_edge(Edge::new("extract", "map-b"))
        .with_edge(Edge::new("map-a", "load-a"))
        .with_edge(Edge::new("map-b", "load-b"));
    definition.context.parallel_execution = Some(ParallelExecution {
        enabled: true,
        max_concurrent_steps: 2,
        error_policy: policy,
    });
    definition
}

#[tokio::test]
async fn parallel_fail_fast_skips_failed_branch_successors() {
    let executors = Arc::new(TestExecutors::new(product_rows()));
    let executor = PipelineExecutor::new(executors.clone());
    let cx = ExecutorContext::new("run-4", "fanout");

    let report = executor
        .execute(&two_branch_dag(true, ErrorPolicy::FailFast), &cx)
        .await
        .unwrap();

    match &report.outcome {
        RunOutcome::Failed { step_key, message } => {
            assert_eq!(step_key, "map-a");
            assert!(message.contains("mapping expression failed"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // The failing step left an error detail; its successor never ran.
    assert!(report
        .metrics
        .details
        .iter()
        .any(|detail| detail.step_key == "map-a" && detail.error.is_some()));
    assert!(executors.loaded_for("load-a").is_empty());
    assert!(!report
        .metrics
        .details
        .iter()
        .any(|detail| detail.step_key == "load-a"));
}

#[tokio::test]
async fn parallel_best_effort_completes_surviving_branches() {
    let executors = Arc::new(TestExecutors::new(product_rows()));
    let executor = PipelineExecutor::new(executors.clone());
    let cx = ExecutorContext::new("run-5", "fanout");

    let report = executor
        .execute(&two_branch_dag(true, ErrorPolicy::BestEffort), &cx)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.metrics.failed >= 1);
    assert_eq!(executors.loaded_for("load-b").len(), 3);
    assert!(executors.loaded_for("load-a").is_empty());
}

#[tokio::test]
async fn cancellation_stops_before_the_next_step() {
    let rows = product_rows();
    let definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(
            StepDefinition::new("map", StepKind::Transform)
                .with_config(StepConfig::new().with("cancelDuring", json!(true))),
        )
        .with_step(StepDefinition::new("load", StepKind::Load));
    let executors = Arc::new(TestExecutors::new(rows));
    let events = Arc::new(MemoryEventBus::new());
    let executor = PipelineExecutor::new(executors.clone()).with_events(events.clone());
    let cx = ExecutorContext::new("run-6", "cancellable");

    let report = executor.execute(&definition, &cx).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    // The in-flight transform completed; the load never began.
    assert_eq!(report.metrics.details.len(), 2);
    assert_eq!(executors.loaded_count(), 0);
    assert_eq!(
        events
            .kinds()
            .iter()
            .filter(|kind| **kind == EventKind::PipelineRunCancelled)
            .count(),
        1
    );
}

#[tokio::test]
async fn route_branches_feed_matching_edges() {
    let rows = vec![
        record_from(&[("sku", json!("E1")), ("region", json!("eu"))]),
        record_from(&[("sku", json!("U1")), ("region", json!("us"))]),
        record_from(&[("sku", json!("E2")), ("region", json!("eu"))]),
    ];
    let definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(StepDefinition::new("split", StepKind::Route))
        .with_step(StepDefinition::new("load-eu", StepKind::Load))
        .with_step(StepDefinition::new("load-us", StepKind::Load))
        .with_edge(Edge::new("extract", "split"))
        .with_edge(Edge::new("split", "load-eu").with_branch("eu"))
        .with_edge(Edge::new("split", "load-us").with_branch("us"));
    let executors = Arc::new(TestExecutors::new(rows));
    let executor = PipelineExecutor::new(executors.clone());
    let cx = ExecutorContext::new("run-7", "router");

    let report = executor.execute(&definition, &cx).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.metrics.counters.routed, 3);
    assert_eq!(executors.loaded_for("load-eu").len(), 2);
    assert_eq!(executors.loaded_for("load-us").len(), 1);

    let route_detail = report
        .metrics
        .details
        .iter()
        .find(|detail| detail.step_key == "split")
        .unwrap();
    let branches = route_detail.branches.as_ref().unwrap();
    assert_eq!(branches["eu"], 2);
    assert_eq!(branches["us"], 1);
}

#[tokio::test]
async fn idempotency_filter_drops_same_run_duplicates_before_load() {
    let rows = vec![
        record_from(&[("sku", json!("A1"))]),
        record_from(&[("sku", json!("A1"))]),
        record_from(&[("sku", json!("B1"))]),
    ];
    let mut definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(StepDefinition::new("load", StepKind::Load));
    definition.context = PipelineContext {
        idempotency_key: Some("sku".to_string()),
        ..PipelineContext::default()
    };
    let executors = Arc::new(TestExecutors::new(rows));
    let executor = PipelineExecutor::new(executors.clone());
    let cx = ExecutorContext::new("run-8", "dedupe");

    let report = executor.execute(&definition, &cx).await.unwrap();

    assert_eq!(report.metrics.processed, 3);
    assert_eq!(report.metrics.counters.loaded, 2);
    assert_eq!(executors.loaded_count(), 2);
}

struct TagInterceptor {
    tag: &'static str,
}

#[async_trait]
impl Interceptor for TagInterceptor {
    fn name(&self) -> &str {
        self.tag
    }

    async fn intercept(
        &self,
        _ctx: &HookContext<'_>,
        mut records: Vec<Record>,
    ) -> datahub_core::Result<Vec<Record>> {
        for record in &mut records {
            let tags = record
                .entry("tags".to_string())
                .or_insert_with(|| json!([]));
            if let Some(list) = tags.as_array_mut() {
                list.push(json!(self.tag));
            }
        }
        Ok(records)
    }
}

#[tokio::test]
async fn before_hooks_mutate_processing_steps_but_not_terminal_steps() {
    let mut hooks = HookService::new();
    hooks.register(
        HookStage::BeforeTransform,
        Arc::new(TagInterceptor { tag: "pre-map" }),
    );
    hooks.register(
        HookStage::AfterTransform,
        Arc::new(TagInterceptor { tag: "post-map" }),
    );
    // Terminal chain is observational: this tag must never reach the loader.
    hooks.register(
        HookStage::BeforeLoad,
        Arc::new(TagInterceptor { tag: "pre-load" }),
    );

    let definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(StepDefinition::new("map", StepKind::Transform))
        .with_step(StepDefinition::new("load", StepKind::Load));
    let executors = Arc::new(TestExecutors::new(vec![record_from(&[(
        "sku",
        json!("A1"),
    )])]));
    let executor = PipelineExecutor::new(executors.clone()).with_hooks(Arc::new(hooks));
    let cx = ExecutorContext::new("run-9", "hooked");

    let report = executor.execute(&definition, &cx).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);

    let loaded = executors.loaded_for("load");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0]["tags"], json!(["pre-map", "post-map"]));
}

#[tokio::test]
async fn trigger_and_unknown_kinds_are_skipped() {
    let raw = json!({
        "version": 1,
        "steps": [
            {"key": "trigger", "type": "TRIGGER"},
            {"key": "extract", "type": "EXTRACT"},
            {"key": "mystery", "type": "QUANTUM_FOLD"},
            {"key": "load", "type": "LOAD"}
        ]
    });
    let definition: PipelineDefinition = serde_json::from_value(raw).unwrap();
    let executors = Arc::new(TestExecutors::new(product_rows()));
    let executor = PipelineExecutor::new(executors.clone());
    let cx = ExecutorContext::new("run-10", "forward-compat");

    let report = executor.execute(&definition, &cx).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);

    let trigger_detail = &report.metrics.details[0];
    assert_eq!(trigger_detail.skipped, Some(true));
    assert_eq!(trigger_detail.unhandled, None);

    let mystery_detail = report
        .metrics
        .details
        .iter()
        .find(|detail| detail.step_key == "mystery")
        .unwrap();
    assert_eq!(mystery_detail.unhandled, Some(true));

    // Unknown kind passed the extracted records through to the loader.
    assert_eq!(executors.loaded_count(), 3);
}

#[tokio::test]
async fn feed_detail_carries_output_path() {
    let definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(
            StepDefinition::new("feed", StepKind::Feed)
                .with_config(StepConfig::new().with("path", json!("/tmp/feed.xml"))),
        );
    let executors = Arc::new(TestExecutors::new(product_rows()));
    let events = Arc::new(MemoryEventBus::new());
    let executor = PipelineExecutor::new(executors).with_events(events.clone());
    let cx = ExecutorContext::new("run-11", "feeds");

    let report = executor.execute(&definition, &cx).await.unwrap();
    let feed_detail = report
        .metrics
        .details
        .iter()
        .find(|detail| detail.step_key == "feed")
        .unwrap();
    assert_eq!(feed_detail.output_path.as_deref(), Some("/tmp/feed.xml"));

    let feed_event = events
        .snapshot()
        .into_iter()
        .find(|event| event.kind == EventKind::FeedGenerated)
        .unwrap();
    assert_eq!(feed_event.data.output_path.as_deref(), Some("/tmp/feed.xml"));
}

#[tokio::test]
async fn load_rejections_feed_counters_quarantine_and_stats() {
    let definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(
            StepDefinition::new("load", StepKind::Load)
                .with_config(StepConfig::new().with("failSkus", json!(["B1"]))),
        );
    let executors = Arc::new(TestExecutors::new(product_rows()));
    let sink = Arc::new(CapturingErrorSink::default());
    let events = Arc::new(MemoryEventBus::new());
    let step_log = Arc::new(datahub_core::MemoryStepLog::new());
    let executor = PipelineExecutor::new(executors.clone())
        .with_error_sink(sink.clone())
        .with_events(events.clone())
        .with_step_log(datahub_core::SafeStepLog::new(step_log.clone()));
    let cx = ExecutorContext::new("run-13", "loads");

    let report = executor.execute(&definition, &cx).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.metrics.counters.loaded, 2);
    assert_eq!(report.metrics.counters.rejected, 1);
    assert_eq!(report.metrics.succeeded, 2);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.recent_failed.len(), 1);
    assert_eq!(sink.errors.lock().len(), 1);

    // Outcomes mirror into the stats threshold gates read.
    assert_eq!(cx.stats().error_count, 1);
    assert_eq!(cx.stats().success_count, 2);

    let loaded_event = events
        .snapshot()
        .into_iter()
        .find(|event| event.kind == EventKind::RecordLoaded)
        .unwrap();
    assert_eq!(loaded_event.data.ok, Some(2));
    assert_eq!(loaded_event.data.fail, Some(1));

    // The sink opted into debug samples, so the pre-load sample was taken.
    let entries = step_log.snapshot();
    assert!(entries
        .iter()
        .any(|entry| matches!(entry, datahub_core::StepLogEntry::LoadSample { step_key, count } if step_key == "load" && *count == 3)));
    assert!(entries
        .iter()
        .any(|entry| matches!(entry, datahub_core::StepLogEntry::ExtractSample { count: 3, .. })));
}

#[tokio::test]
async fn sequential_step_failure_preserves_metrics() {
    let definition = PipelineDefinition::new(1)
        .with_step(StepDefinition::new("extract", StepKind::Extract))
        .with_step(
            StepDefinition::new("map", StepKind::Transform)
                .with_config(StepConfig::new().with("explode", json!(true))),
        )
        .with_step(StepDefinition::new("load", StepKind::Load));
    let executors = Arc::new(TestExecutors::new(product_rows()));
    let executor = PipelineExecutor::new(executors.clone());
    let cx = ExecutorContext::new("run-12", "failing");

    let report = executor.execute(&definition, &cx).await.unwrap();
    match &report.outcome {
        RunOutcome::Failed { step_key, .. } => assert_eq!(step_key, "map"),
        other => panic!("expected failure, got {other:?}"),
    }
    // Extract already counted before the failure.
    assert_eq!(report.metrics.counters.extracted, 3);
    assert_eq!(executors.loaded_count(), 0);
}
