//! 学生回答生成
//!
//! 由角色设定、最近对话、参考资料组装提示词，经 RetryController 调用 LLM，
//! 再按问题类型整形（确认式 / 选择式只保留最短有效回答，开放式截断到字数上限）。

pub mod prompt;
pub mod shape;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::config::GeneratorSection;
use crate::core::{Idempotency, RetryController, SessionError};
use crate::llm::LlmBackend;
use crate::persona::Persona;

pub use shape::{classify, shape_answer, QuestionKind, CONFIRMATION_TOKENS};

/// 一问一答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// 提示词中的参考资料（知识库、角色示例对话），加载时已截断
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMaterial {
    pub knowledge_base: Option<String>,
    pub sample_dialogue: Option<String>,
}

fn read_truncated(path: &Path, max_chars: usize) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取参考资料失败: {}", path.display()))?;
    let total = content.chars().count();
    info!(path = %path.display(), chars = total, "reference material loaded");
    if max_chars > 0 && total > max_chars {
        Ok(content.chars().take(max_chars).collect())
    } else {
        Ok(content)
    }
}

impl ReferenceMaterial {
    pub fn load(section: &GeneratorSection) -> anyhow::Result<Self> {
        let max = section.max_reference_chars;
        Ok(Self {
            knowledge_base: section
                .knowledge_base
                .as_deref()
                .map(|p| read_truncated(p, max))
                .transpose()?,
            sample_dialogue: section
                .sample_dialogue
                .as_deref()
                .map(|p| read_truncated(p, max))
                .transpose()?,
        })
    }
}

pub struct AnswerGenerator {
    backend: Arc<dyn LlmBackend>,
    retry: Arc<RetryController>,
    config: GeneratorSection,
}

impl AnswerGenerator {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        retry: Arc<RetryController>,
        config: GeneratorSection,
    ) -> Self {
        Self {
            backend,
            retry,
            config,
        }
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// 生成一条学生回答；后端在重试后仍失败时返回 GenerationFailed
    pub async fn generate(
        &self,
        persona: &Persona,
        history: &[Exchange],
        question: &str,
        reference: &ReferenceMaterial,
    ) -> Result<String, SessionError> {
        let messages = prompt::build_messages(
            persona,
            history,
            question,
            reference,
            self.config.history_turns,
            self.config.max_answer_chars,
        );

        let backend = &self.backend;
        let messages = &messages;
        let outcome = self
            .retry
            .execute("llm.complete", Idempotency::Idempotent, move || async move {
                backend.complete(messages).await.map_err(SessionError::from)
            })
            .await
            .map_err(|e| SessionError::GenerationFailed(e.to_string()))?;

        let kind = classify(question);
        let answer = shape_answer(&outcome.value, &kind, self.config.max_answer_chars);
        debug!(
            persona = %persona.key,
            kind = ?kind,
            attempts = outcome.attempts,
            raw = %outcome.value,
            answer = %answer,
            "answer generated"
        );
        if answer.is_empty() {
            return Err(SessionError::GenerationFailed("empty answer".to_string()));
        }
        Ok(answer)
    }
}
