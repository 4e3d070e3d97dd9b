//! DeepSeek / Doubao 方舟客户端（均为 OpenAI 兼容格式）
//!
//! - DeepSeek Base URL: https://api.deepseek.com，模型 deepseek-chat / deepseek-reasoner
//! - Doubao 方舟 Base URL: https://ark.cn-beijing.volces.com/api/v3

use crate::llm::OpenAiBackend;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

pub const ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DOUBAO_SEED: &str = "doubao-seed-1-6-251015";

/// 创建 DeepSeek 客户端
///
/// - 优先使用传入的 key，其次环境变量 `DEEPSEEK_API_KEY`
/// - 模型依次取参数、`DEEPSEEK_MODEL` 环境变量、deepseek-chat
pub fn create_deepseek_backend(model: Option<&str>, api_key: Option<&str>) -> OpenAiBackend {
    let api_key = api_key
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiBackend::new(Some(DEEPSEEK_BASE_URL), &model, Some(api_key.as_str()))
}

/// 创建 Doubao 方舟 SDK 客户端（`ARK_API_KEY` / `ARK_BASE_URL` / `DOUBAO_MODEL`）
pub fn create_doubao_backend(
    model: Option<&str>,
    base_url: Option<&str>,
    api_key: Option<&str>,
) -> OpenAiBackend {
    let api_key = api_key
        .map(String::from)
        .or_else(|| std::env::var("ARK_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let base_url = base_url
        .map(String::from)
        .or_else(|| std::env::var("ARK_BASE_URL").ok())
        .unwrap_or_else(|| ARK_BASE_URL.to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DOUBAO_MODEL").ok())
        .unwrap_or_else(|| DOUBAO_SEED.to_string());

    OpenAiBackend::new(Some(&base_url), &model, Some(api_key.as_str()))
}
