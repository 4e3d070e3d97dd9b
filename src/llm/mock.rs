//! Mock 后端（用于测试与离线演练，无需 API）
//!
//! - MockLlm：按脚本依次返回回答；脚本用尽后回显最后一条 User 消息的「当前问题」
//! - MockEmbedder：按字符散列到固定维度的确定性向量

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{EmbeddingBackend, LlmBackend, LlmError, Message, Role};

#[derive(Debug, Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
    last_prompt: Mutex<Vec<Message>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定结果
    pub fn scripted(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// 每次都返回同一个回答
    pub fn fixed(answer: &str, times: usize) -> Self {
        Self::scripted((0..times).map(|_| Ok(answer.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 最近一次调用收到的消息
    pub fn last_prompt(&self) -> Vec<Message> {
        self.last_prompt
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = messages.to_vec();
        }

        if let Some(next) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            return next;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let question = last_user
            .split("## 当前问题")
            .nth(1)
            .and_then(|rest| rest.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or(last_user);
        Ok(format!("关于「{}」我还在想", question))
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

/// MockEmbedder 输出向量的维度
pub const MOCK_DIMS: usize = 64;

#[derive(Debug, Default)]
pub struct MockEmbedder {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 模拟嵌入服务不可用
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::Network("mock embedder unavailable".to_string()));
        }
        let mut v = vec![0.0f32; MOCK_DIMS];
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            let bucket = (c as u32).wrapping_mul(2_654_435_761) as usize % MOCK_DIMS;
            v[bucket] += 1.0;
        }
        Ok(v)
    }

    fn model_id(&self) -> &str {
        "mock-embedding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_echoes_current_question() {
        let llm = MockLlm::scripted(vec![Err(LlmError::Network("down".into())), Ok("好的".into())]);
        let prompt = vec![Message::user("## 当前问题\n是否确认？\n")];
        assert!(llm.complete(&prompt).await.is_err());
        assert_eq!(llm.complete(&prompt).await.unwrap(), "好的");
        assert_eq!(llm.complete(&prompt).await.unwrap(), "关于「是否确认？」我还在想");
        assert_eq!(llm.calls(), 3);
        assert_eq!(llm.last_prompt().len(), 1);
    }

    #[tokio::test]
    async fn test_embedder_is_deterministic_and_can_fail() {
        let embedder = MockEmbedder::new();
        let a = embedder.embed("疼了多久了？").await.unwrap();
        let b = embedder.embed("疼了 多久了？").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), MOCK_DIMS);

        embedder.set_failing(true);
        assert!(embedder.embed("疼了多久了？").await.is_err());
        assert_eq!(embedder.calls(), 3);
    }
}
