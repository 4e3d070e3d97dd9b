//! Spar - 能力训练平台自动化对练工具
//!
//! 入口：初始化日志、加载配置、检查平台连通性，按运行模式组装回答来源，
//! 为每个选中的学生角色启动一个会话并发运行，结束后打印汇总。
//!
//! 用法：`spar [配置文件路径]`

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use spar::answer::{
    AnswerSource, GeneratedSource, ManualHandle, ManualSource, PresetSource, ReplayedSource,
};
use spar::config::{load_config, AppConfig, ReplayVariant, RunMode};
use spar::core::{
    run_sessions, RetryController, RetryPolicy, SessionContext, SessionError, SessionLimits,
    SessionReport, SessionStatus, SessionSupervisor, ShutdownManager, TaskScheduler,
    WorkflowOrchestrator,
};
use spar::generator::{AnswerGenerator, ReferenceMaterial};
use spar::llm::{create_backend_from_config, create_embedder_from_config};
use spar::persona::{Persona, PersonaRegistry};
use spar::platform::HttpPlatformClient;
use spar::recorder::FileRecorder;
use spar::replay::{LexicalReplayEngine, ReplayEngine, SemanticReplayEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let task_id = cfg
        .workflow
        .task_id
        .clone()
        .context("未配置 task_id（[workflow].task_id 或环境变量 TASK_ID）")?;

    let client = HttpPlatformClient::new(&cfg.platform).context("Failed to build platform client")?;
    match client.probe().await {
        Ok(_) => {}
        Err(e @ (SessionError::Configuration(_) | SessionError::Authentication(_))) => {
            return Err(e).context("平台连通性检查失败");
        }
        Err(e) => warn!(error = %e, "platform probe failed, continuing"),
    }

    let registry = match &cfg.workflow.persona_file {
        Some(path) => PersonaRegistry::from_toml_file(path)?,
        None => PersonaRegistry::builtin(),
    };
    let personas = registry.select(&cfg.workflow.personas[..])?;
    info!(
        task = %task_id,
        personas = ?personas.iter().map(|p| p.key.as_str()).collect::<Vec<_>>(),
        mode = ?cfg.app.mode,
        "Starting training run"
    );

    let retry = Arc::new(RetryController::new(RetryPolicy::from_config(&cfg.retry)));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let manual = if cfg.app.mode == RunMode::Interactive || cfg.workflow.manual_fallback {
        let (source, handle) = ManualSource::channel(personas.len());
        spawn_operator_console(handle);
        Some(source)
    } else {
        None
    };

    let shared_source = build_shared_source(&cfg, Arc::clone(&retry), manual.clone()).await?;
    let fallback: Option<Arc<dyn AnswerSource>> = match (cfg.app.mode, &manual) {
        (RunMode::Interactive, _) => None,
        (_, Some(manual)) => Some(Arc::new(manual.clone()) as Arc<dyn AnswerSource>),
        _ => None,
    };

    let mut sessions = Vec::with_capacity(personas.len());
    for persona in &personas {
        let source = match &shared_source {
            Some(source) => Arc::clone(source),
            None => {
                let preset = PresetSource::new(cfg.workflow.preset_answers.clone());
                Arc::new(preset) as Arc<dyn AnswerSource>
            }
        };
        sessions.push(session_context(
            &cfg,
            &task_id,
            Arc::clone(persona),
            &client,
            source,
            fallback.clone(),
            &shutdown,
        )?);
    }

    let orchestrator = Arc::new(WorkflowOrchestrator::new(retry, SessionLimits::from_config(&cfg)));
    let scheduler = Arc::new(TaskScheduler::new(cfg.app.max_concurrent_sessions));
    let reports = run_sessions(orchestrator, scheduler, &task_id, sessions).await;

    print_summary(&reports);
    let failed = reports
        .iter()
        .filter(|r| r.status == SessionStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{failed} 个会话失败");
    }
    Ok(())
}

/// 按运行模式构造可在会话间共享的回答来源；预设模式每个会话一份，返回 None
async fn build_shared_source(
    cfg: &AppConfig,
    retry: Arc<RetryController>,
    manual: Option<ManualSource>,
) -> anyhow::Result<Option<Arc<dyn AnswerSource>>> {
    match cfg.app.mode {
        RunMode::Interactive => {
            let manual = manual.context("interactive mode needs an operator console")?;
            let source: Arc<dyn AnswerSource> = Arc::new(manual);
            Ok(Some(source))
        }
        RunMode::Preset => {
            if cfg.workflow.preset_answers.is_empty() {
                bail!("preset 模式需要配置 [workflow].preset_answers");
            }
            Ok(None)
        }
        RunMode::Generated => Ok(Some(generated_source(cfg, retry)?)),
        RunMode::Replayed => {
            let inner = generated_source(cfg, retry)?;
            let engine = build_replay_engine(cfg).await?;
            let source: Arc<dyn AnswerSource> = Arc::new(ReplayedSource::new(engine, inner));
            Ok(Some(source))
        }
    }
}

fn generated_source(
    cfg: &AppConfig,
    retry: Arc<RetryController>,
) -> anyhow::Result<Arc<dyn AnswerSource>> {
    let backend = create_backend_from_config(&cfg.llm);
    let generator = Arc::new(AnswerGenerator::new(backend, retry, cfg.generator.clone()));
    let reference = Arc::new(ReferenceMaterial::load(&cfg.generator)?);
    Ok(Arc::new(GeneratedSource::new(generator, reference)))
}

/// 回放引擎在任何会话开始前构建完成（语义模式下包括向量缓存）
async fn build_replay_engine(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ReplayEngine>> {
    let source = cfg
        .replay
        .source
        .as_deref()
        .context("replayed 模式需要配置 [replay].source")?;

    if cfg.replay.variant == ReplayVariant::Semantic {
        match create_embedder_from_config(&cfg.embedding) {
            Some(embedder) => {
                let engine = SemanticReplayEngine::open(
                    source,
                    cfg.replay.cache_dir.as_deref(),
                    embedder,
                    cfg.replay.semantic_threshold,
                    cfg.replay.scope,
                )
                .await?;
                return Ok(Arc::new(engine));
            }
            None => warn!("no embedding backend configured, falling back to lexical replay"),
        }
    }

    let threshold = cfg.replay.lexical_threshold;
    let engine = LexicalReplayEngine::from_transcript(source, threshold, cfg.replay.scope)?;
    info!(source = %source.display(), pairs = engine.len(), "Lexical replay engine ready");
    Ok(Arc::new(engine))
}

fn session_context(
    cfg: &AppConfig,
    task_id: &str,
    persona: Arc<Persona>,
    client: &HttpPlatformClient,
    source: Arc<dyn AnswerSource>,
    fallback: Option<Arc<dyn AnswerSource>>,
    shutdown: &ShutdownManager,
) -> anyhow::Result<SessionContext> {
    let recorder = FileRecorder::create(&cfg.log_dir(), task_id, &persona.key, &persona.label)?;
    Ok(SessionContext {
        persona,
        // 每个会话独立的 sessionId
        platform: Arc::new(client.fork()),
        source,
        fallback,
        recorder: Box::new(recorder),
        supervisor: Arc::new(SessionSupervisor::with_parent(&shutdown.token())),
    })
}

/// 终端操作员：依次回答各会话发来的提问，EOF 视为退出
fn spawn_operator_console(mut handle: ManualHandle) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(prompt) = handle.recv().await {
            println!(
                "\n[{}] Step {} | 第 {} 轮\nAI: {}",
                prompt.persona_key, prompt.step_id, prompt.turn_index, prompt.question
            );
            print!("学生 (quit 退出)> ");
            let _ = std::io::stdout().flush();
            let line = lines.next_line().await.ok().flatten();
            let _ = prompt.reply.send(line);
        }
    });
}

fn print_summary(reports: &[SessionReport]) {
    println!("\n{}", "=".repeat(60));
    println!("训练结束，共 {} 个会话", reports.len());
    for report in reports {
        let outcome = match (&report.status, &report.stop_reason, &report.error) {
            (_, _, Some(err)) => format!("失败: {err}"),
            (_, Some(reason), _) => format!("已停止 ({reason:?})"),
            (status, None, None) => format!("{status:?}"),
        };
        println!(
            "- {} | {} 轮 | 步骤 {} 个 | {}",
            report.persona_key,
            report.turns,
            report.steps_visited.len(),
            outcome
        );
        if let Some(path) = &report.log_path {
            println!("  日志: {}", path.display());
        }
    }
    println!("{}", "=".repeat(60));
}
