//! Subcommand implementations: wires the `EventBus`, `StateStore`, generator
//! client, sinks, and worker pool into one pipeline, then drives the
//! `Orchestrator` (spec §9.1).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chapterforge_anthropic::AnthropicGeneratorClient;
use chapterforge_clients::{CachedGeneratorClient, HttpObjectStore, ObjectStore, ServiceClient};
use chapterforge_core::{
    EventBus, EventPayload, EventType, ExecutionMode, ExecutionStatus, SourceDocument,
};
use chapterforge_openai::OpenAiGeneratorClient;
use chapterforge_reliability::RetryPolicy;
use chapterforge_storage::{Cache, FileStateStore, StateStore};
use chapterforge_worker::{
    AggregatorWorker, AiWorker, MediaWorker, Orchestrator, ParserWorker, WorkerContext,
    WorkerPool, WorkerPoolConfig,
};
use uuid::Uuid;

use crate::config::Config;
use crate::output::{print_field, OutputFormat};
use crate::ExitCode;

const DEFAULT_OBJECT_STORE_URL: &str = "http://localhost:9100";

struct Pipeline {
    orchestrator: Orchestrator,
    bus: EventBus,
    _pool: WorkerPool,
}

async fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let bus = EventBus::default();
    bus.start().await;

    let state_store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(config.state_file_root()).await?);

    let object_store: Arc<dyn ObjectStore> = {
        let client = ServiceClient::new(
            config.api.object_store_url.clone().unwrap_or_else(|| DEFAULT_OBJECT_STORE_URL.to_string()),
            "object_store",
            config.api.openai.rate_limit.unwrap_or(60),
            Duration::from_secs(config.api.timeout_secs),
            RetryPolicy::fixed(Duration::from_secs(1), config.api.max_retries.max(1)),
        );
        Arc::new(HttpObjectStore::new(client))
    };

    let ctx = WorkerContext { bus: bus.clone(), state_store: Arc::clone(&state_store), cancellation: Default::default() };
    let mut pool = WorkerPool::new(ctx);

    let parser_config = WorkerPoolConfig::new(config.workers.counts.parser.max(1) as usize);
    pool.register(ParserWorker::new(), parser_config).await;

    let ai_config = WorkerPoolConfig::new(config.workers.counts.ai.max(1) as usize)
        .with_retry_policy(RetryPolicy::exponential());
    register_ai_worker(&mut pool, config, ai_config).await?;

    let media_config = WorkerPoolConfig::new(config.workers.counts.media.max(1) as usize);
    pool.register(MediaWorker::new(Arc::clone(&object_store)), media_config).await;

    let aggregator_config = WorkerPoolConfig::new(config.workers.counts.aggregator.max(1) as usize);
    pool.register(AggregatorWorker::new(object_store), aggregator_config).await;

    let orchestrator = Orchestrator::new(bus.clone(), state_store);
    Ok(Pipeline { orchestrator, bus, _pool: pool })
}

async fn register_ai_worker(pool: &mut WorkerPool, config: &Config, pool_config: WorkerPoolConfig) -> anyhow::Result<()> {
    let cache = Arc::new(Cache::new(
        config.cache.size.unwrap_or(1000),
        config.cache.ttl_secs.map(Duration::from_secs),
    ));
    let rate_limit = config.api.openai.rate_limit.unwrap_or(60);

    if let Some(key) = &config.api.openai.api_key {
        let inner = OpenAiGeneratorClient::new(key.clone(), "gpt-4o-mini", rate_limit);
        let generator = Arc::new(CachedGeneratorClient::new(inner, cache));
        pool.register(AiWorker::new(generator, "gpt-4o-mini"), pool_config).await;
        return Ok(());
    }
    if let Some(key) = &config.api.anthropic.api_key {
        let rate_limit = config.api.anthropic.rate_limit.unwrap_or(rate_limit);
        let inner = AnthropicGeneratorClient::new(key.clone(), "claude-3-5-sonnet-20241022", rate_limit);
        let generator = Arc::new(CachedGeneratorClient::new(inner, cache));
        pool.register(AiWorker::new(generator, "claude-3-5-sonnet-20241022"), pool_config).await;
        return Ok(());
    }

    anyhow::bail!("no LM api key configured (set CHAPTERFORGE_OPENAI_API_KEY or CHAPTERFORGE_ANTHROPIC_API_KEY)")
}

/// Waits for a terminal event for `workflow_id`, subscribing just for this
/// one run the way a one-shot CLI invocation needs to (no persistent server
/// process to poll against, per `examples/original_source/main.py`'s
/// synchronous `processor.process()` call).
async fn await_terminal(bus: &EventBus, workflow_id: Uuid, timeout: Duration) -> anyhow::Result<EventPayload> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Arc::new(tokio::sync::Mutex::new(Some(tx)));

    for event_type in [EventType::ReportGenerated, EventType::WorkflowFailed, EventType::WorkflowSuspended] {
        let tx = Arc::clone(&tx);
        bus.subscribe(
            event_type,
            Arc::new(move |event| {
                let tx = Arc::clone(&tx);
                Box::pin(async move {
                    if event.workflow_id != workflow_id {
                        return;
                    }
                    if let Some(sender) = tx.lock().await.take() {
                        let _ = sender.send(event.payload);
                    }
                })
            }),
        )
        .await;
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(_)) => anyhow::bail!("event bus closed before workflow {workflow_id} reached a terminal state"),
        Err(_) => anyhow::bail!("workflow {workflow_id} did not complete within {timeout:?}"),
    }
}

pub async fn run(config: &Config, output: OutputFormat, source_file: &Path, mode: &str) -> anyhow::Result<ExitCode> {
    if !source_file.exists() {
        eprintln!("source file not found: {}", source_file.display());
        return Ok(ExitCode::InputMissing);
    }
    let text = tokio::fs::read_to_string(source_file).await?;
    let title = source_file.file_stem().and_then(|s| s.to_str()).unwrap_or("untitled").to_string();
    let source = SourceDocument { title, text };

    let mode = match mode {
        "sync" => ExecutionMode::Sync,
        "dry-run" => ExecutionMode::DryRun,
        _ => ExecutionMode::Async,
    };

    let pipeline = build_pipeline(config).await?;
    let workflow_id = pipeline.orchestrator.run(source, mode).await?;

    if mode == ExecutionMode::DryRun {
        if output.is_text() {
            print_field("execution_id", &workflow_id.to_string());
            print_field("status", "validated (dry-run, nothing published)");
        } else {
            output.print_value(&serde_json::json!({ "execution_id": workflow_id, "mode": "dry-run" }));
        }
        return Ok(ExitCode::Success);
    }

    if mode == ExecutionMode::Async {
        if output.is_text() {
            print_field("execution_id", &workflow_id.to_string());
            print_field("status", "started");
        } else {
            output.print_value(&serde_json::json!({ "execution_id": workflow_id, "status": "started" }));
        }
        return Ok(ExitCode::Success);
    }

    match await_terminal(&pipeline.bus, workflow_id, Duration::from_secs(3600)).await {
        Ok(EventPayload::ReportGenerated { report, output_dir, .. }) => {
            if output.is_text() {
                print_field("execution_id", &workflow_id.to_string());
                print_field("status", "completed");
                print_field("report", &output_dir);
            } else {
                output.print_value(&report);
            }
            Ok(ExitCode::Success)
        }
        Ok(EventPayload::WorkflowFailed { reason, .. }) => {
            eprintln!("workflow failed: {reason}");
            Ok(ExitCode::WorkflowFailed)
        }
        Ok(_) => {
            eprintln!("workflow ended in an unexpected state");
            Ok(ExitCode::WorkflowFailed)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::WorkflowTimeout)
        }
    }
}

pub async fn resume(config: &Config, output: OutputFormat, execution_id: Uuid) -> anyhow::Result<ExitCode> {
    let pipeline = build_pipeline(config).await?;
    pipeline.orchestrator.resume(execution_id).await?;

    match await_terminal(&pipeline.bus, execution_id, Duration::from_secs(3600)).await {
        Ok(EventPayload::ReportGenerated { report, .. }) => {
            if output.is_text() {
                print_field("execution_id", &execution_id.to_string());
                print_field("status", "completed");
            } else {
                output.print_value(&report);
            }
            Ok(ExitCode::Success)
        }
        Ok(EventPayload::WorkflowFailed { reason, .. }) => {
            eprintln!("workflow failed: {reason}");
            Ok(ExitCode::WorkflowFailed)
        }
        Ok(_) => Ok(ExitCode::WorkflowFailed),
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::WorkflowTimeout)
        }
    }
}

pub async fn cancel(config: &Config, output: OutputFormat, execution_id: Uuid) -> anyhow::Result<ExitCode> {
    let pipeline = build_pipeline(config).await?;
    pipeline.orchestrator.cancel(execution_id).await?;
    if output.is_text() {
        print_field("execution_id", &execution_id.to_string());
        print_field("status", "cancelled");
    } else {
        output.print_value(&serde_json::json!({ "execution_id": execution_id, "status": "cancelled" }));
    }
    Ok(ExitCode::Success)
}

pub async fn status(config: &Config, output: OutputFormat, execution_id: Uuid) -> anyhow::Result<ExitCode> {
    let pipeline = build_pipeline(config).await?;
    match pipeline.orchestrator.status(execution_id).await? {
        Some(execution) => {
            if output.is_text() {
                print_field("execution_id", &execution.id.to_string());
                print_field("status", &format!("{:?}", execution.status));
                print_field("mode", &format!("{:?}", execution.mode));
            } else {
                output.print_value(&execution);
            }
            Ok(if execution.status == ExecutionStatus::Failed { ExitCode::WorkflowFailed } else { ExitCode::Success })
        }
        None => {
            eprintln!("no execution found for {execution_id}");
            Ok(ExitCode::InputMissing)
        }
    }
}
