//! 语义回放：嵌入向量余弦相似度匹配历史问题

use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::llm::EmbeddingBackend;
use crate::replay::{
    extract_final_question, select_best, ReplayEngine, ReplayHit, ReplayIndex, ReplayOutcome,
    ReplayScope, Scored,
};

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub struct SemanticReplayEngine {
    index: Arc<ReplayIndex>,
    embedder: Arc<dyn EmbeddingBackend>,
    threshold: f32,
    scope: ReplayScope,
    /// 嵌入服务故障只告警一次
    degraded: AtomicBool,
}

impl SemanticReplayEngine {
    pub fn new(
        index: Arc<ReplayIndex>,
        embedder: Arc<dyn EmbeddingBackend>,
        threshold: f32,
        scope: ReplayScope,
    ) -> Self {
        Self {
            index,
            embedder,
            threshold,
            scope,
            degraded: AtomicBool::new(false),
        }
    }

    /// 加载或构建 source 对应的缓存后创建引擎；须在会话开始前调用
    pub async fn open(
        source: &Path,
        cache_dir: Option<&Path>,
        embedder: Arc<dyn EmbeddingBackend>,
        threshold: f32,
        scope: ReplayScope,
    ) -> anyhow::Result<Self> {
        let cache_path = ReplayIndex::cache_path_for(source, cache_dir);
        let (index, stats) =
            ReplayIndex::load_or_build(source, &cache_path, embedder.as_ref()).await?;
        info!(
            source = %source.display(),
            entries = index.len(),
            from_cache = stats.from_cache,
            "Semantic replay index ready"
        );
        Ok(Self::new(Arc::new(index), embedder, threshold, scope))
    }

    pub fn index(&self) -> &ReplayIndex {
        &self.index
    }

    async fn query_vector<'a>(&'a self, normalized: &str) -> Option<Cow<'a, [f32]>> {
        if let Some(entry) = self.index.get(normalized).filter(|e| !e.embedding.is_empty()) {
            return Some(Cow::Borrowed(entry.embedding.as_slice()));
        }
        match self.embedder.embed(normalized).await {
            Ok(v) if !v.is_empty() => Some(Cow::Owned(v)),
            Ok(_) => None,
            Err(e) => {
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    warn!(
                        error = %e,
                        "embedding backend unavailable, semantic lookups degrade to miss"
                    );
                } else {
                    debug!(error = %e, "embedding failed");
                }
                None
            }
        }
    }
}

#[async_trait]
impl ReplayEngine for SemanticReplayEngine {
    async fn lookup(&self, question: &str, step_id: &str) -> ReplayOutcome {
        let normalized = extract_final_question(question);
        if normalized.is_empty() {
            return ReplayOutcome::Miss;
        }
        let Some(query) = self.query_vector(&normalized).await else {
            return ReplayOutcome::Miss;
        };

        let scored: Vec<Scored> = self
            .index
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.embedding.is_empty())
            .map(|(idx, e)| Scored {
                idx,
                position: e.position,
                same_step: e.step_id == step_id,
                score: cosine_similarity(&query, &e.embedding),
            })
            .collect();

        match select_best(&scored, self.threshold, self.scope) {
            Some(best) => {
                let entry = &self.index.entries[best.idx];
                debug!(step = step_id, score = best.score, "semantic replay hit");
                ReplayOutcome::Hit(ReplayHit {
                    answer: entry.answer_text.clone(),
                    matched_question: entry.question_text.clone(),
                    step_id: entry.step_id.clone(),
                    score: best.score,
                    position: entry.position,
                })
            }
            None => {
                debug!(step = step_id, "semantic replay miss");
                ReplayOutcome::Miss
            }
        }
    }

    fn name(&self) -> &'static str {
        "semantic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::transcript::{render_text, Turn};

    async fn engine(
        dir: &Path,
        embedder: Arc<MockEmbedder>,
        scope: ReplayScope,
    ) -> SemanticReplayEngine {
        let source = dir.join("d.txt");
        let mut text = String::new();
        text.push_str(&render_text(&Turn::ai("s1", 0, "很好。汽蚀现象是什么原因造成的？")));
        text.push_str(&render_text(&Turn::student("s1", 1, "进口压力太低")));
        text.push_str(&render_text(&Turn::ai("s2", 1, "离心泵启动前为什么要灌泵？")));
        text.push_str(&render_text(&Turn::student("s2", 2, "防止气缚")));
        std::fs::write(&source, text).unwrap();
        SemanticReplayEngine::open(&source, None, embedder, 0.8, scope)
            .await
            .unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_indexed_question_reuses_cached_vector() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(MockEmbedder::new());
        let engine = engine(dir.path(), embedder.clone(), ReplayScope::StepFirst).await;
        let calls = embedder.calls();

        let outcome = engine
            .lookup("回答有道理！汽蚀现象是什么原因造成的？", "s1")
            .await;
        match outcome {
            ReplayOutcome::Hit(hit) => assert_eq!(hit.answer, "进口压力太低"),
            ReplayOutcome::Miss => panic!("expected hit"),
        }
        assert_eq!(embedder.calls(), calls);
    }

    #[tokio::test]
    async fn test_step_only_scope_misses_other_step() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(MockEmbedder::new());
        let engine = engine(dir.path(), embedder, ReplayScope::StepOnly).await;
        assert!(!engine.lookup("离心泵启动前为什么要灌泵？", "s1").await.is_hit());
        assert!(engine.lookup("离心泵启动前为什么要灌泵？", "s2").await.is_hit());
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_miss() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(MockEmbedder::new());
        let engine = engine(dir.path(), embedder.clone(), ReplayScope::StepFirst).await;
        embedder.set_failing(true);

        assert_eq!(engine.lookup("完全没见过的问题？", "s1").await, ReplayOutcome::Miss);
        assert_eq!(engine.lookup("另一个新问题？", "s1").await, ReplayOutcome::Miss);
        // 已索引的问题不需要嵌入，仍可命中
        assert!(engine.lookup("汽蚀现象是什么原因造成的？", "s1").await.is_hit());
    }
}
