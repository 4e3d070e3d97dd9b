//! LLM / 嵌入后端抽象
//!
//! 所有对话后端（OpenAI 兼容 SDK / DeepSeek / Doubao POST / Mock）实现 LlmBackend；
//! 嵌入后端实现 EmbeddingBackend。错误统一为 LlmError，由调用方映射为会话错误。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::SessionError;
use crate::llm::Message;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("LLM network error: {0}")]
    Network(String),

    #[error("LLM authentication failed: {0}")]
    Auth(String),

    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM returned empty content")]
    EmptyResponse,
}

impl LlmError {
    /// 按错误文本归类（SDK 错误类型随版本变化，统一按消息判断）
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout(message)
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("authentication")
        {
            LlmError::Auth(message)
        } else if lower.contains("429") || lower.contains("rate limit") {
            LlmError::RateLimited(message)
        } else if lower.contains("error sending request")
            || lower.contains("connection")
            || lower.contains("connect")
        {
            LlmError::Network(message)
        } else {
            LlmError::Api(message)
        }
    }
}

impl From<LlmError> for SessionError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(m) | LlmError::Network(m) => SessionError::TransientNetwork(m),
            LlmError::RateLimited(m) => SessionError::RateLimited(m),
            LlmError::Auth(m) => SessionError::Authentication(m),
            LlmError::Api(m) => SessionError::GenerationFailed(m),
            LlmError::EmptyResponse => {
                SessionError::GenerationFailed("empty completion".to_string())
            }
        }
    }
}

/// 对话补全后端
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// 非流式补全，返回首条候选的文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 当前使用的模型名（写入日志）
    fn model_id(&self) -> &str;
}

/// 文本嵌入后端
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// 向量缓存按模型名区分，换模型即失效
    fn model_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sdk_messages() {
        assert!(matches!(LlmError::classify("request timed out"), LlmError::Timeout(_)));
        assert!(matches!(LlmError::classify("HTTP 401 Unauthorized"), LlmError::Auth(_)));
        assert!(matches!(LlmError::classify("429 Too Many Requests"), LlmError::RateLimited(_)));
        assert!(matches!(
            LlmError::classify("error sending request for url"),
            LlmError::Network(_)
        ));
        assert!(matches!(LlmError::classify("model not found"), LlmError::Api(_)));
    }

    #[test]
    fn test_llm_errors_map_into_session_taxonomy() {
        let transient: SessionError = LlmError::Timeout("t".into()).into();
        assert!(transient.is_transient());
        let auth: SessionError = LlmError::Auth("401".into()).into();
        assert!(matches!(auth, SessionError::Authentication(_)));
        let empty: SessionError = LlmError::EmptyResponse.into();
        assert!(matches!(empty, SessionError::GenerationFailed(_)));
    }
}
