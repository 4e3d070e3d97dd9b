//! Spar - 能力训练平台自动化对练工具
//!
//! 模块划分：
//! - **answer**: 学生回答来源（人工 / 预设 / 生成 / 回放）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排状态机、重试、恢复、会话监管、任务调度、优雅关闭
//! - **generator**: 提示词组装与回答整形
//! - **llm**: 对话 / 嵌入后端抽象与实现（Doubao / DeepSeek / OpenAI 兼容 / Mock）
//! - **persona**: 学生角色注册表
//! - **platform**: 训练平台接口（HTTP 客户端与脚本化模拟）
//! - **recorder**: 对话记录落盘
//! - **replay**: 历史对话回放（字面相似度 / 语义相似度 + 向量缓存）
//! - **transcript**: 对话记录的数据结构、格式化与解析

pub mod answer;
pub mod config;
pub mod core;
pub mod generator;
pub mod llm;
pub mod persona;
pub mod platform;
pub mod recorder;
pub mod replay;
pub mod transcript;
