//! 内部 LLM 网关客户端：直接 HTTP POST OpenAI 格式的 chat/completions
//!
//! 网关按 `service-code` 头计费与路由，`api-key` 头可选。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmPostSection;
use crate::llm::{LlmBackend, LlmError, Message, SamplingParams};

pub struct DoubaoPostBackend {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    service_code: String,
    max_tokens: u32,
    sampling: SamplingParams,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl DoubaoPostBackend {
    pub fn new(section: &LlmPostSection) -> Self {
        let api_key = section
            .api_key
            .clone()
            .or_else(|| std::env::var("LLM_API_KEY").ok())
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("LLM_API_KEY 未设置，网关可能拒绝请求");
        }
        Self {
            http: reqwest::Client::new(),
            api_url: section.api_url.clone(),
            api_key,
            model: section.model.clone(),
            service_code: section.service_code.clone(),
            max_tokens: section.max_tokens,
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }
}

#[async_trait]
impl LlmBackend for DoubaoPostBackend {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.sampling.temperature,
            max_tokens: self.max_tokens,
            top_p: self.sampling.top_p,
            frequency_penalty: self.sampling.frequency_penalty,
            presence_penalty: self.sampling.presence_penalty,
        };

        let mut request = self
            .http
            .post(&self.api_url)
            .header("service-code", &self.service_code)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(e.to_string())
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(LlmError::Auth(format!("gateway returned {status}")));
        }
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited(format!("gateway returned {status}")));
        }
        if status.is_server_error() {
            return Err(LlmError::Network(format!("gateway returned {status}")));
        }
        if !status.is_success() {
            return Err(LlmError::Api(format!("gateway returned {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Api(format!("解析响应失败: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
