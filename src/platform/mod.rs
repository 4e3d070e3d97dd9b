//! 训练平台接口：步骤列表、运行卡片（步骤初始化）、提交学生回答
//!
//! - **client**：基于 reqwest 的 HTTP 实现，每个会话一份（持有平台 sessionId）
//! - **mock**：脚本化平台，供测试与离线演练

pub mod client;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::SessionError;

pub use client::HttpPlatformClient;
pub use mock::{ScriptedPlatform, ScriptedReply};

/// 平台声明的一个步骤；列表顺序即步骤顺序
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StepDescriptor {
    #[serde(rename = "stepId")]
    pub step_id: String,
    /// 在会话步骤列表中的序号（从 0 开始），由客户端填写
    #[serde(skip)]
    pub order: usize,
    #[serde(default, alias = "needSkipStep", alias = "skip")]
    pub skip_signal: bool,
    #[serde(default, alias = "stepName")]
    pub name: Option<String>,
}

impl StepDescriptor {
    pub fn new(step_id: impl Into<String>, order: usize) -> Self {
        Self {
            step_id: step_id.into(),
            order,
            skip_signal: false,
            name: None,
        }
    }
}

/// runCard 的结果
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InitOutcome {
    /// AI 开场白
    pub opening: Option<String>,
    /// 本步骤无需作答，直接进入下一步
    pub skip_signal: bool,
    /// 平台拒绝运行卡片，视为训练结束
    pub finished: bool,
}

/// chat 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 仍在当前步骤，AI 给出下一句
    Reply { text: String },
    /// 跳到下一步骤；next_step_id 为平台提示
    Skip {
        next_step_id: Option<String>,
        text: Option<String>,
    },
    /// 训练结束
    Terminal { text: Option<String> },
}

#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list_steps(&self, task_id: &str) -> Result<Vec<StepDescriptor>, SessionError>;

    async fn init_step(&self, task_id: &str, step_id: &str) -> Result<InitOutcome, SessionError>;

    /// 非幂等：同一回答重复提交会产生重复轮次
    async fn submit_turn(
        &self,
        task_id: &str,
        step_id: &str,
        text: &str,
    ) -> Result<SubmitOutcome, SessionError>;
}
