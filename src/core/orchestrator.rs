//! 工作流编排器：单个学生角色会话的步骤 / 轮次状态机
//!
//! ```text
//! Init → StepLoaded → TurnPending → TurnSubmitted
//!      → { StepLoaded | TurnPending | Completed | Failed }
//! ```
//!
//! - Init：拉取步骤列表（经 RetryController，可重试）
//! - StepLoaded：初始化当前步骤并记录 AI 开场白；步骤声明或 runCard 返回跳过时直接进入下一步
//! - TurnPending：检查暂停 / 取消 / 轮数上限，向回答来源取回答并提交（至多一次）
//! - TurnSubmitted：按平台结果留在本步骤、前进到后续步骤或结束
//!
//! 多个会话由 run_sessions 并发运行，彼此只共享只读的角色与回放索引。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::answer::{Answer, AnswerRequest, AnswerSource};
use crate::config::AppConfig;
use crate::core::session_supervisor::Checkpoint;
use crate::core::{
    Idempotency, RecoveryAction, RecoveryEngine, RetryController, Session, SessionError,
    SessionStatus, SessionSupervisor, StopReason, TaskScheduler,
};
use crate::generator::Exchange;
use crate::persona::Persona;
use crate::platform::{PlatformApi, StepDescriptor, SubmitOutcome};
use crate::recorder::{Recorder, RunCardEntry};
use crate::transcript::{Transcript, Turn};

/// 单会话运行限制
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_turns: u32,
    pub turn_delay: Duration,
    /// 从步骤列表的第几项开始
    pub start_step_index: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_turns: 50,
            turn_delay: Duration::from_secs(1),
            start_step_index: 0,
        }
    }
}

impl SessionLimits {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_turns: cfg.workflow.max_turns,
            turn_delay: Duration::from_millis(cfg.workflow.turn_delay_ms),
            start_step_index: cfg.platform.start_step_index,
        }
    }
}

/// 一个会话运行所需的全部协作者；除 recorder 外均可在外部保留引用
pub struct SessionContext {
    pub persona: Arc<Persona>,
    pub platform: Arc<dyn PlatformApi>,
    pub source: Arc<dyn AnswerSource>,
    /// 主来源生成失败时的后备（如人工输入）
    pub fallback: Option<Arc<dyn AnswerSource>>,
    pub recorder: Box<dyn Recorder>,
    pub supervisor: Arc<SessionSupervisor>,
}

/// 会话结束后的汇总
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub persona_key: String,
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub error: Option<SessionError>,
    /// 已完成的轮数
    pub turns: u32,
    pub steps_visited: Vec<String>,
    pub transcript: Transcript,
    pub log_path: Option<PathBuf>,
}

enum Phase {
    Init,
    StepLoaded,
    TurnPending { question: String },
    TurnSubmitted { question: String, outcome: SubmitOutcome },
    Completed,
    Stopped(StopReason),
    Failed(SessionError),
}

/// 一次运行的可变状态
struct SessionRun {
    session: Session,
    ctx: SessionContext,
    steps: Vec<StepDescriptor>,
    transcript: Transcript,
    history: Vec<Exchange>,
    steps_visited: Vec<String>,
}

impl SessionRun {
    fn publish(&self) {
        self.ctx.supervisor.publish(self.session.snapshot());
    }

    fn step_id(&self) -> String {
        self.session.current_step_id.clone().unwrap_or_default()
    }

    fn record(&mut self, turn: Turn) {
        let turn = self.transcript.push(turn);
        if let Err(e) = self.ctx.recorder.append(turn) {
            warn!(session = %self.session.session_id, error = %e, "failed to persist turn");
        }
        self.session.turns_recorded = self.transcript.len();
    }

    fn record_run_card(&mut self, entry: RunCardEntry) {
        if let Err(e) = self.ctx.recorder.record_run_card(&entry) {
            warn!(session = %self.session.session_id, error = %e, "failed to persist runCard");
        }
    }
}

pub struct WorkflowOrchestrator {
    retry: Arc<RetryController>,
    recovery: RecoveryEngine,
    limits: SessionLimits,
}

impl WorkflowOrchestrator {
    pub fn new(retry: Arc<RetryController>, limits: SessionLimits) -> Self {
        Self {
            retry,
            recovery: RecoveryEngine::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// 运行一个会话直到结束；失败时保留已有记录
    pub async fn run(&self, task_id: &str, ctx: SessionContext) -> SessionReport {
        let mut run = SessionRun {
            session: Session::new(task_id, &ctx.persona.key),
            ctx,
            steps: Vec::new(),
            transcript: Transcript::new(),
            history: Vec::new(),
            steps_visited: Vec::new(),
        };
        info!(
            session = %run.session.session_id,
            persona = %run.session.persona_key,
            task = task_id,
            source = run.ctx.source.name(),
            "Session started"
        );
        run.publish();

        let mut phase = Phase::Init;
        let terminal = loop {
            phase = match phase {
                Phase::Init => self.init(&mut run).await,
                Phase::StepLoaded => self.load_step(&mut run).await,
                Phase::TurnPending { question } => self.take_turn(&mut run, question).await,
                Phase::TurnSubmitted { question, outcome } => {
                    self.after_submit(&mut run, question, outcome).await
                }
                terminal => break terminal,
            };
        };

        let mut error = None;
        match terminal {
            Phase::Completed => run.session.status = SessionStatus::Completed,
            Phase::Stopped(reason) => {
                run.session.status = SessionStatus::Completed;
                run.session.stop_reason = Some(reason);
            }
            Phase::Failed(e) => {
                error!(
                    session = %run.session.session_id,
                    persona = %run.session.persona_key,
                    error = %e,
                    "Session failed"
                );
                run.session.status = SessionStatus::Failed;
                run.session.last_error = Some(e.to_string());
                error = Some(e);
            }
            _ => {}
        }
        run.publish();
        info!(
            session = %run.session.session_id,
            persona = %run.session.persona_key,
            status = ?run.session.status,
            stop_reason = ?run.session.stop_reason,
            turns = run.session.turn_index,
            "Session finished"
        );

        SessionReport {
            session_id: run.session.session_id.clone(),
            persona_key: run.session.persona_key.clone(),
            status: run.session.status,
            stop_reason: run.session.stop_reason,
            error,
            turns: run.session.turn_index,
            steps_visited: run.steps_visited,
            log_path: run.ctx.recorder.location().map(PathBuf::from),
            transcript: run.transcript,
        }
    }

    async fn init(&self, run: &mut SessionRun) -> Phase {
        if run.ctx.supervisor.is_cancelled() {
            return Phase::Stopped(StopReason::Cancelled);
        }
        let platform = &run.ctx.platform;
        let task_id = run.session.task_id.as_str();
        let steps = match self
            .retry
            .execute("platform.list_steps", Idempotency::Idempotent, move || {
                platform.list_steps(task_id)
            })
            .await
        {
            Ok(outcome) => outcome.value,
            Err(e) => return Phase::Failed(e),
        };

        if steps.is_empty() {
            return Phase::Failed(SessionError::Configuration(format!(
                "task {} has no steps",
                run.session.task_id
            )));
        }
        let start = self.limits.start_step_index;
        if start >= steps.len() {
            return Phase::Failed(SessionError::Configuration(format!(
                "start_step_index {start} out of range ({} steps)",
                steps.len()
            )));
        }
        info!(session = %run.session.session_id, steps = steps.len(), start, "Step list loaded");
        run.steps = steps;
        run.session.step_cursor = start;
        Phase::StepLoaded
    }

    async fn load_step(&self, run: &mut SessionRun) -> Phase {
        if run.ctx.supervisor.is_cancelled() {
            return Phase::Stopped(StopReason::Cancelled);
        }
        let step = run.steps[run.session.step_cursor].clone();
        run.session.current_step_id = Some(step.step_id.clone());
        run.steps_visited.push(step.step_id.clone());
        run.publish();
        info!(
            session = %run.session.session_id,
            persona = %run.session.persona_key,
            step = %step.step_id,
            order = step.order,
            "Step loaded"
        );

        if step.skip_signal {
            info!(step = %step.step_id, "step declared skippable");
            return self.advance(run, None);
        }

        let platform = &run.ctx.platform;
        let task_id = run.session.task_id.as_str();
        let step_id = step.step_id.as_str();
        let result = self
            .retry
            .execute("platform.init_step", Idempotency::Idempotent, move || {
                platform.init_step(task_id, step_id)
            })
            .await;
        let entry = RunCardEntry::new(
            &run.session.task_id,
            &step.step_id,
            result.as_ref().map(|o| &o.value),
        );
        run.record_run_card(entry);
        let init = match result {
            Ok(outcome) => outcome.value,
            Err(e) => return Phase::Failed(e),
        };

        if init.finished {
            return Phase::Completed;
        }
        let opening = init.opening.unwrap_or_default();
        if !opening.is_empty() {
            let turn = Turn::ai(&step.step_id, run.session.turn_index, opening.clone());
            run.record(turn);
        }
        if init.skip_signal {
            info!(step = %step.step_id, "platform asked to skip step on init");
            return self.advance(run, None);
        }
        Phase::TurnPending { question: opening }
    }

    /// 前进到下一步骤；平台提示的 nextStepId 在当前步骤之后时跳到该步骤
    fn advance(&self, run: &mut SessionRun, hint: Option<String>) -> Phase {
        let cursor = run.session.step_cursor;
        let next = match hint {
            Some(id) => match run.steps.iter().position(|s| s.step_id == id) {
                Some(pos) if pos > cursor => pos,
                Some(_) => {
                    warn!(
                        hint = %id,
                        "nextStepId is not ahead of current step, following declared order"
                    );
                    cursor + 1
                }
                None => {
                    warn!(hint = %id, "nextStepId not in step list, following declared order");
                    cursor + 1
                }
            },
            None => cursor + 1,
        };
        if next >= run.steps.len() {
            info!(session = %run.session.session_id, "No more steps");
            return Phase::Completed;
        }
        run.session.step_cursor = next;
        Phase::StepLoaded
    }

    async fn take_turn(&self, run: &mut SessionRun, question: String) -> Phase {
        loop {
            match run.ctx.supervisor.checkpoint(run.session.turn_index).await {
                Checkpoint::Continue => break,
                Checkpoint::Cancelled => return Phase::Stopped(StopReason::Cancelled),
                Checkpoint::Pause => {
                    run.session.status = SessionStatus::AwaitingInput;
                    run.publish();
                    info!(
                        session = %run.session.session_id,
                        turns = run.session.turn_index,
                        "Session paused"
                    );
                    if !run.ctx.supervisor.wait_resume().await {
                        return Phase::Stopped(StopReason::Cancelled);
                    }
                    run.session.status = SessionStatus::Running;
                    run.publish();
                    info!(session = %run.session.session_id, "Session resumed");
                }
            }
        }

        if run.session.turn_index >= self.limits.max_turns {
            warn!(
                session = %run.session.session_id,
                max_turns = self.limits.max_turns,
                "Turn limit reached, stopping session"
            );
            return Phase::Stopped(StopReason::TurnLimit);
        }

        let turn_index = run.session.turn_index + 1;
        let step_id = run.step_id();
        let answer = match self.obtain_answer(run, &step_id, turn_index, &question).await {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                info!(session = %run.session.session_id, "Answer source exhausted");
                return Phase::Stopped(StopReason::SourceExhausted);
            }
            Err(e) => return Phase::Failed(e),
        };

        let platform = &run.ctx.platform;
        let task_id = run.session.task_id.as_str();
        let step = step_id.as_str();
        let text = answer.text.as_str();
        let submitted = self
            .retry
            .execute("platform.submit_turn", Idempotency::AtMostOnce, move || {
                platform.submit_turn(task_id, step, text)
            })
            .await;

        match submitted {
            Ok(outcome) => {
                run.session.turn_index = turn_index;
                let turn = Turn::student(&step_id, turn_index, answer.text.clone())
                    .with_origin(answer.origin.as_str());
                run.record(turn);
                run.history.push(Exchange {
                    question: question.clone(),
                    answer: answer.text,
                });
                run.publish();
                Phase::TurnSubmitted {
                    question,
                    outcome: outcome.value,
                }
            }
            Err(e) => {
                let turn = Turn::student(&step_id, turn_index, answer.text)
                    .with_origin(answer.origin.as_str())
                    .with_error(format!("提交失败: {e}"));
                run.record(turn);
                Phase::Failed(e)
            }
        }
    }

    async fn obtain_answer(
        &self,
        run: &mut SessionRun,
        step_id: &str,
        turn_index: u32,
        question: &str,
    ) -> Result<Option<Answer>, SessionError> {
        let persona = Arc::clone(&run.ctx.persona);
        let history = run.history.clone();
        let request = AnswerRequest {
            persona: &persona,
            step_id,
            turn_index,
            question,
            history: &history,
        };

        let err = match run.ctx.source.answer(&request).await {
            Ok(answer) => return Ok(answer),
            Err(e) => e,
        };

        let fallback = run.ctx.fallback.clone();
        match self.recovery.handle(&err, fallback.is_some()) {
            RecoveryAction::UseFallback(msg) => {
                warn!(session = %run.session.session_id, turn = turn_index, "{}", msg);
                run.record(Turn::student(step_id, turn_index, "").with_error(err.to_string()));
                match fallback {
                    Some(fallback) => fallback.answer(&request).await,
                    None => Err(err),
                }
            }
            RecoveryAction::FailSession => {
                run.record(Turn::student(step_id, turn_index, "").with_error(err.to_string()));
                Err(err)
            }
        }
    }

    async fn after_submit(
        &self,
        run: &mut SessionRun,
        question: String,
        outcome: SubmitOutcome,
    ) -> Phase {
        let step_id = run.step_id();
        let turn_index = run.session.turn_index;
        match outcome {
            SubmitOutcome::Reply { text } => {
                if !text.is_empty() {
                    run.record(Turn::ai(&step_id, turn_index, text.clone()));
                }
                if !self.pause_between_turns(&run.ctx.supervisor).await {
                    return Phase::Stopped(StopReason::Cancelled);
                }
                // 平台没有给出新问题时沿用上一问
                let question = if text.is_empty() { question } else { text };
                Phase::TurnPending { question }
            }
            SubmitOutcome::Skip { next_step_id, text } => {
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    run.record(Turn::ai(&step_id, turn_index, text));
                }
                if !self.pause_between_turns(&run.ctx.supervisor).await {
                    return Phase::Stopped(StopReason::Cancelled);
                }
                self.advance(run, next_step_id)
            }
            SubmitOutcome::Terminal { text } => {
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    run.record(Turn::ai(&step_id, turn_index, text));
                }
                Phase::Completed
            }
        }
    }

    /// 轮间间隔；期间被取消返回 false
    async fn pause_between_turns(&self, supervisor: &SessionSupervisor) -> bool {
        if self.limits.turn_delay.is_zero() {
            return !supervisor.is_cancelled();
        }
        let token = supervisor.cancel_token();
        tokio::select! {
            _ = tokio::time::sleep(self.limits.turn_delay) => true,
            _ = token.cancelled() => false,
        }
    }
}

/// 并发运行多个会话；调度器限制同时运行的数量
pub async fn run_sessions(
    orchestrator: Arc<WorkflowOrchestrator>,
    scheduler: Arc<TaskScheduler>,
    task_id: &str,
    sessions: Vec<SessionContext>,
) -> Vec<SessionReport> {
    let handles = sessions.into_iter().map(|ctx| {
        let orchestrator = Arc::clone(&orchestrator);
        let scheduler = Arc::clone(&scheduler);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let _permit = scheduler.acquire_session().await;
            orchestrator.run(&task_id, ctx).await
        })
    });

    join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "session task aborted");
                None
            }
        })
        .collect()
}
