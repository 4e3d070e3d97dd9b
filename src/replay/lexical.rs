//! 字面回放：按字符序列相似度匹配历史问题

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::replay::{
    collapse_whitespace, dedupe_last_wins, select_best, QaPair, ReplayEngine, ReplayHit,
    ReplayOutcome, ReplayScope, Scored,
};
use crate::transcript::{load_transcript, qa_pairs};

/// Ratcliff/Obershelp 相似度：2 * 匹配字符数 / 总字符数，取值 [0, 1]
pub fn sequence_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f32 / total as f32
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (i, j, k) = longest_common_block(a, b);
    if k == 0 {
        return 0;
    }
    k + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + k..], &b[j + k..])
}

/// 最长公共子串 (a 起点, b 起点, 长度)；等长时取 a 中最早的
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    let mut best = (0, 0, 0);
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            let k = cur[j + 1];
            if k > best.2 {
                best = (i + 1 - k, j + 1 - k, k);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

struct LexicalEntry {
    normalized: String,
    pair: QaPair,
}

pub struct LexicalReplayEngine {
    entries: Vec<LexicalEntry>,
    threshold: f32,
    scope: ReplayScope,
}

impl LexicalReplayEngine {
    pub fn new(pairs: Vec<QaPair>, threshold: f32, scope: ReplayScope) -> Self {
        let entries = dedupe_last_wins(pairs, collapse_whitespace)
            .into_iter()
            .map(|(normalized, pair)| LexicalEntry { normalized, pair })
            .collect();
        Self {
            entries,
            threshold,
            scope,
        }
    }

    /// 从对话记录文件加载
    pub fn from_transcript(
        path: &Path,
        threshold: f32,
        scope: ReplayScope,
    ) -> anyhow::Result<Self> {
        let pairs = qa_pairs(&load_transcript(path)?);
        tracing::info!(
            source = %path.display(),
            pairs = pairs.len(),
            "Lexical replay index loaded"
        );
        Ok(Self::new(pairs, threshold, scope))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ReplayEngine for LexicalReplayEngine {
    async fn lookup(&self, question: &str, step_id: &str) -> ReplayOutcome {
        let normalized = collapse_whitespace(question);
        if normalized.is_empty() {
            return ReplayOutcome::Miss;
        }
        let scored: Vec<Scored> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, e)| Scored {
                idx,
                position: e.pair.position,
                same_step: e.pair.step_id == step_id,
                score: sequence_ratio(&normalized, &e.normalized),
            })
            .collect();

        match select_best(&scored, self.threshold, self.scope) {
            Some(best) => {
                let pair = &self.entries[best.idx].pair;
                debug!(step = step_id, score = best.score, "lexical replay hit");
                ReplayOutcome::Hit(ReplayHit {
                    answer: pair.answer.clone(),
                    matched_question: pair.question.clone(),
                    step_id: pair.step_id.clone(),
                    score: best.score,
                    position: pair.position,
                })
            }
            None => {
                debug!(step = step_id, "lexical replay miss");
                ReplayOutcome::Miss
            }
        }
    }

    fn name(&self) -> &'static str {
        "lexical"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(q: &str, a: &str, step: &str, position: usize) -> QaPair {
        QaPair {
            question: q.into(),
            answer: a.into(),
            step_id: step.into(),
            position,
            embedding: None,
        }
    }

    #[test]
    fn test_sequence_ratio_basics() {
        assert_eq!(sequence_ratio("", ""), 1.0);
        assert_eq!(sequence_ratio("abc", ""), 0.0);
        assert_eq!(sequence_ratio("abcd", "abcd"), 1.0);
        assert!((sequence_ratio("abcd", "bcde") - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_reworded_question_scores_above_threshold() {
        let r = sequence_ratio("汽蚀现象是什么原因造成的？", "汽蚀现象是什么原因导致的?");
        assert!(r >= 0.7, "ratio = {r}");
    }

    #[tokio::test]
    async fn test_lexical_hit_and_miss() {
        let engine = LexicalReplayEngine::new(
            vec![
                pair("欢迎！你准备好了吗？", "准备好了", "s1", 0),
                pair("汽蚀现象是什么原因造成的？", "进口压力低于饱和蒸汽压", "s1", 1),
            ],
            0.7,
            ReplayScope::StepFirst,
        );

        match engine.lookup("汽蚀现象是什么原因导致的?", "s1").await {
            ReplayOutcome::Hit(hit) => {
                assert_eq!(hit.answer, "进口压力低于饱和蒸汽压");
                assert!(hit.score >= 0.7);
            }
            ReplayOutcome::Miss => panic!("expected hit"),
        }
        assert_eq!(
            engine.lookup("请介绍一下离心泵的铭牌参数", "s1").await,
            ReplayOutcome::Miss
        );
    }

    #[tokio::test]
    async fn test_scope_policies() {
        let pairs = vec![pair("汽蚀现象是什么原因造成的？", "压力低", "s1", 0)];
        let step_first = LexicalReplayEngine::new(pairs.clone(), 0.7, ReplayScope::StepFirst);
        let step_only = LexicalReplayEngine::new(pairs, 0.7, ReplayScope::StepOnly);

        assert!(step_first.lookup("汽蚀现象是什么原因造成的？", "s2").await.is_hit());
        assert!(!step_only.lookup("汽蚀现象是什么原因造成的？", "s2").await.is_hit());
        assert!(step_only.lookup("汽蚀现象是什么原因造成的？", "s1").await.is_hit());
    }

    #[tokio::test]
    async fn test_duplicate_questions_last_answer_wins() {
        let engine = LexicalReplayEngine::new(
            vec![
                pair("你是学生吗？", "是", "s1", 0),
                pair("你是学生吗？", "是的，我是学生", "s1", 1),
            ],
            0.7,
            ReplayScope::StepFirst,
        );
        assert_eq!(engine.len(), 1);
        match engine.lookup("你是学生吗？", "s1").await {
            ReplayOutcome::Hit(hit) => assert_eq!(hit.answer, "是的，我是学生"),
            ReplayOutcome::Miss => panic!("expected hit"),
        }
    }
}
