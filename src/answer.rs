//! 学生回答来源
//!
//! 编排器只依赖 AnswerSource 接口；运行模式决定用哪种实现：
//! - Manual：操作员通过通道逐条输入（交互模式，也可作为生成失败时的后备）
//! - Preset：预设回答按顺序消费
//! - Generated：AnswerGenerator 调用 LLM 生成
//! - Replayed：先查回放引擎，未命中再交给内层来源

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::core::SessionError;
use crate::generator::{AnswerGenerator, Exchange, ReferenceMaterial};
use crate::persona::Persona;
use crate::replay::{ReplayEngine, ReplayOutcome};

/// 一次取回答所需的上下文
#[derive(Debug, Clone, Copy)]
pub struct AnswerRequest<'a> {
    pub persona: &'a Persona,
    pub step_id: &'a str,
    /// 本次回答将占用的轮次
    pub turn_index: u32,
    pub question: &'a str,
    pub history: &'a [Exchange],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOrigin {
    Manual,
    Preset,
    Generated,
    Replayed,
}

impl AnswerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerOrigin::Manual => "manual",
            AnswerOrigin::Preset => "preset",
            AnswerOrigin::Generated => "generated",
            AnswerOrigin::Replayed => "replayed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub origin: AnswerOrigin,
}

#[async_trait]
pub trait AnswerSource: Send + Sync {
    /// Ok(None) 表示来源已耗尽（预设用完、操作员退出），会话随之停止
    async fn answer(&self, request: &AnswerRequest<'_>) -> Result<Option<Answer>, SessionError>;

    fn name(&self) -> &'static str;
}

/// 发给操作员的一次提问
#[derive(Debug)]
pub struct ManualPrompt {
    pub persona_key: String,
    pub step_id: String,
    pub turn_index: u32,
    pub question: String,
    /// None 表示退出
    pub reply: oneshot::Sender<Option<String>>,
}

/// 操作员输入；克隆后可供多个会话共用同一个输入端
#[derive(Clone)]
pub struct ManualSource {
    prompts: mpsc::Sender<ManualPrompt>,
}

/// 操作员一侧：依次接收各会话的提问
pub struct ManualHandle {
    prompts: mpsc::Receiver<ManualPrompt>,
}

impl ManualHandle {
    pub async fn recv(&mut self) -> Option<ManualPrompt> {
        self.prompts.recv().await
    }
}

impl ManualSource {
    pub fn channel(buffer: usize) -> (ManualSource, ManualHandle) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (ManualSource { prompts: tx }, ManualHandle { prompts: rx })
    }
}

#[async_trait]
impl AnswerSource for ManualSource {
    async fn answer(&self, request: &AnswerRequest<'_>) -> Result<Option<Answer>, SessionError> {
        loop {
            let (reply, rx) = oneshot::channel();
            let prompt = ManualPrompt {
                persona_key: request.persona.key.clone(),
                step_id: request.step_id.to_string(),
                turn_index: request.turn_index,
                question: request.question.to_string(),
                reply,
            };
            if self.prompts.send(prompt).await.is_err() {
                return Ok(None);
            }
            let text = match rx.await {
                Ok(Some(text)) => text,
                Ok(None) | Err(_) => return Ok(None),
            };
            let text = text.trim();
            if text.is_empty() {
                debug!("empty manual answer ignored");
                continue;
            }
            if text.eq_ignore_ascii_case("quit") {
                return Ok(None);
            }
            return Ok(Some(Answer {
                text: text.to_string(),
                origin: AnswerOrigin::Manual,
            }));
        }
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

/// 预设回答；每个会话一份，各自维护游标
pub struct PresetSource {
    answers: Vec<String>,
    cursor: AtomicUsize,
}

impl PresetSource {
    pub fn new(answers: Vec<String>) -> Self {
        Self {
            answers,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AnswerSource for PresetSource {
    async fn answer(&self, _request: &AnswerRequest<'_>) -> Result<Option<Answer>, SessionError> {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(self.answers.get(i).map(|text| Answer {
            text: text.clone(),
            origin: AnswerOrigin::Preset,
        }))
    }

    fn name(&self) -> &'static str {
        "preset"
    }
}

pub struct GeneratedSource {
    generator: Arc<AnswerGenerator>,
    reference: Arc<ReferenceMaterial>,
}

impl GeneratedSource {
    pub fn new(generator: Arc<AnswerGenerator>, reference: Arc<ReferenceMaterial>) -> Self {
        Self {
            generator,
            reference,
        }
    }
}

#[async_trait]
impl AnswerSource for GeneratedSource {
    async fn answer(&self, request: &AnswerRequest<'_>) -> Result<Option<Answer>, SessionError> {
        let text = self
            .generator
            .generate(request.persona, request.history, request.question, &self.reference)
            .await?;
        Ok(Some(Answer {
            text,
            origin: AnswerOrigin::Generated,
        }))
    }

    fn name(&self) -> &'static str {
        "generated"
    }
}

pub struct ReplayedSource {
    engine: Arc<dyn ReplayEngine>,
    inner: Arc<dyn AnswerSource>,
}

impl ReplayedSource {
    pub fn new(engine: Arc<dyn ReplayEngine>, inner: Arc<dyn AnswerSource>) -> Self {
        Self { engine, inner }
    }
}

#[async_trait]
impl AnswerSource for ReplayedSource {
    async fn answer(&self, request: &AnswerRequest<'_>) -> Result<Option<Answer>, SessionError> {
        match self.engine.lookup(request.question, request.step_id).await {
            ReplayOutcome::Hit(hit) => {
                debug!(
                    engine = self.engine.name(),
                    score = hit.score,
                    matched = %hit.matched_question,
                    "answer replayed"
                );
                Ok(Some(Answer {
                    text: hit.answer,
                    origin: AnswerOrigin::Replayed,
                }))
            }
            ReplayOutcome::Miss => self.inner.answer(request).await,
        }
    }

    fn name(&self) -> &'static str {
        "replayed"
    }
}
