//! LLM 层：对话 / 嵌入后端抽象与实现（Doubao SDK / Doubao POST / DeepSeek / OpenAI / Mock）

pub mod deepseek;
pub mod doubao_post;
pub mod embedding;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use deepseek::{create_deepseek_backend, create_doubao_backend, DEEPSEEK_CHAT, DOUBAO_SEED};
pub use doubao_post::DoubaoPostBackend;
pub use embedding::{create_embedder_from_config, OpenAiEmbedder};
pub use message::{Message, Role};
pub use mock::{MockEmbedder, MockLlm, MOCK_DIMS};
pub use openai::{OpenAiBackend, SamplingParams};
pub use traits::{EmbeddingBackend, LlmBackend, LlmError};

/// 根据配置选择对话后端；选择逻辑只在这里，编排核心只依赖 LlmBackend
pub fn create_backend_from_config(cfg: &LlmSection) -> Arc<dyn LlmBackend> {
    let sampling = SamplingParams {
        temperature: cfg.temperature,
        ..SamplingParams::default()
    };
    match cfg.provider.to_lowercase().as_str() {
        "doubao_post" => {
            tracing::info!(
                "Using Doubao POST gateway ({} @ {})",
                cfg.post.model,
                cfg.post.api_url
            );
            Arc::new(DoubaoPostBackend::new(&cfg.post).with_sampling(sampling))
        }
        "deepseek" | "deepseek_sdk" => {
            let backend = create_deepseek_backend(cfg.model.as_deref(), cfg.api_key.as_deref())
                .with_sampling(sampling);
            tracing::info!("Using DeepSeek LLM ({})", backend.model_id());
            Arc::new(backend)
        }
        "openai" => {
            let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI-compatible LLM ({})", model);
            Arc::new(
                OpenAiBackend::new(cfg.base_url.as_deref(), &model, cfg.api_key.as_deref())
                    .with_sampling(sampling),
            )
        }
        "mock" => {
            tracing::warn!("Using Mock LLM");
            Arc::new(MockLlm::new())
        }
        other => {
            if other != "doubao" && other != "doubao_sdk" {
                tracing::warn!("Unknown llm provider '{}', falling back to Doubao SDK", other);
            }
            let backend = create_doubao_backend(
                cfg.model.as_deref(),
                cfg.base_url.as_deref(),
                cfg.api_key.as_deref(),
            )
            .with_sampling(sampling);
            tracing::info!("Using Doubao SDK LLM ({})", backend.model_id());
            Arc::new(backend)
        }
    }
}
