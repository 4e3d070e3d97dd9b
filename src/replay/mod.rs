//! 对话回放：根据 AI 当前问题从历史记录中找回答
//!
//! - **lexical**：字符序列相似度（Ratcliff/Obershelp）
//! - **semantic**：嵌入余弦相似度 + 持久化向量缓存（cache）
//!
//! 两种实现共用 ReplayEngine 接口与候选选择规则：先在同一步骤内找，
//! 同步骤没有过阈值的候选时（StepFirst）再扩展到整份记录；同分取最早出现的。

pub mod cache;
pub mod lexical;
pub mod normalize;
pub mod semantic;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

pub use crate::transcript::QaPair;
pub use cache::{BuildStats, IndexEntry, ReplayIndex, SourceFingerprint};
pub use lexical::{sequence_ratio, LexicalReplayEngine};
pub use normalize::{collapse_whitespace, extract_final_question};
pub use semantic::{cosine_similarity, SemanticReplayEngine};

/// 候选搜索范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayScope {
    /// 同步骤优先，无命中时回退到整份记录
    #[default]
    StepFirst,
    /// 只在同步骤内查找
    StepOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayHit {
    pub answer: String,
    pub matched_question: String,
    pub step_id: String,
    pub score: f32,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    Hit(ReplayHit),
    Miss,
}

impl ReplayOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, ReplayOutcome::Hit(_))
    }
}

#[async_trait]
pub trait ReplayEngine: Send + Sync {
    /// 查找与 question 最匹配的历史回答；未命中不是错误
    async fn lookup(&self, question: &str, step_id: &str) -> ReplayOutcome;

    fn name(&self) -> &'static str;
}

/// 一个已打分的候选
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scored {
    pub idx: usize,
    pub position: usize,
    pub same_step: bool,
    pub score: f32,
}

fn better(a: &Scored, b: &Scored) -> bool {
    a.score > b.score || (a.score == b.score && a.position < b.position)
}

fn best_of<'a>(candidates: impl Iterator<Item = &'a Scored>) -> Option<Scored> {
    candidates.fold(None, |best, c| match best {
        Some(b) if !better(c, &b) => Some(b),
        _ => Some(*c),
    })
}

/// 按步骤范围与阈值选出最佳候选
pub(crate) fn select_best(scored: &[Scored], threshold: f32, scope: ReplayScope) -> Option<Scored> {
    let same_step = best_of(scored.iter().filter(|s| s.same_step && s.score >= threshold));
    if same_step.is_some() || scope == ReplayScope::StepOnly {
        return same_step;
    }
    best_of(scored.iter().filter(|s| s.score >= threshold))
}

/// 按规范化问题去重：后出现的覆盖先出现的，位置沿用第一次出现的位置
pub(crate) fn dedupe_last_wins<F>(pairs: Vec<QaPair>, normalize: F) -> Vec<(String, QaPair)>
where
    F: Fn(&str) -> String,
{
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<(String, QaPair)> = Vec::new();
    for pair in pairs {
        let key = normalize(&pair.question);
        if key.is_empty() {
            continue;
        }
        match slots.get(&key) {
            Some(&i) => {
                let position = out[i].1.position;
                out[i].1 = QaPair { position, ..pair };
            }
            None => {
                slots.insert(key.clone(), out.len());
                out.push((key, pair));
            }
        }
    }
    out
}
