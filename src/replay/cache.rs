//! 语义回放的持久化向量索引
//!
//! 缓存文件与记录文件一一对应，按「来源路径 + 文件大小 + 修改时间 + 嵌入模型」判定是否有效。
//! 失效时重建：已有向量按规范化问题复用，只为新问题调用嵌入接口。
//! 写入采用临时文件 + rename；同一路径的构建在进程内串行。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::UNIX_EPOCH;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm::EmbeddingBackend;
use crate::replay::{dedupe_last_wins, extract_final_question};
use crate::transcript::{load_transcript, qa_pairs};

pub const CACHE_VERSION: u32 = 1;
const CACHE_SUFFIX: &str = ".replay.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub len: u64,
    pub modified_ns: u64,
}

impl SourceFingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let modified_ns = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(Self {
            len: meta.len(),
            modified_ns,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub question_text: String,
    pub normalized: String,
    /// 为空表示上次构建时嵌入失败，下次加载时补齐
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub answer_text: String,
    pub step_id: String,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayIndex {
    pub version: u32,
    pub source: PathBuf,
    pub fingerprint: SourceFingerprint,
    pub model_id: String,
    pub entries: Vec<IndexEntry>,
    #[serde(skip)]
    by_normalized: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// 缓存直接可用，未做任何嵌入
    pub from_cache: bool,
    pub reused: usize,
    pub embedded: usize,
    pub failed: usize,
}

fn build_locks() -> &'static Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn build_lock(path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = build_locks().lock().unwrap_or_else(|e| e.into_inner());
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

impl ReplayIndex {
    /// `<cache_dir 或记录所在目录>/<记录文件名>.replay.json`
    pub fn cache_path_for(source: &Path, cache_dir: Option<&Path>) -> PathBuf {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "transcript".to_string());
        let dir = cache_dir
            .map(Path::to_path_buf)
            .or_else(|| source.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        dir.join(format!("{file_name}{CACHE_SUFFIX}"))
    }

    /// 加载有效缓存，否则从记录重建并写回
    pub async fn load_or_build(
        source: &Path,
        cache_path: &Path,
        embedder: &dyn EmbeddingBackend,
    ) -> anyhow::Result<(ReplayIndex, BuildStats)> {
        let lock = build_lock(cache_path);
        let _guard = lock.lock().await;

        let source_id = std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
        let fingerprint = SourceFingerprint::of(source)
            .with_context(|| format!("读取记录文件信息失败: {}", source.display()))?;

        let previous = Self::read_cache(cache_path);
        if let Some(index) = &previous {
            if index.is_fresh(&source_id, fingerprint, embedder.model_id()) {
                debug!(cache = %cache_path.display(), "replay cache is fresh");
                let stats = BuildStats {
                    from_cache: true,
                    reused: index.entries.len(),
                    ..BuildStats::default()
                };
                return Ok((index.clone(), stats));
            }
        }

        let (index, stats) =
            Self::rebuild(source, source_id, fingerprint, embedder, previous.as_ref()).await?;
        index.persist(cache_path)?;
        info!(
            cache = %cache_path.display(),
            entries = index.entries.len(),
            reused = stats.reused,
            embedded = stats.embedded,
            failed = stats.failed,
            "replay cache rebuilt"
        );
        Ok((index, stats))
    }

    fn read_cache(path: &Path) -> Option<ReplayIndex> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(cache = %path.display(), error = %e, "replay cache unreadable, rebuilding");
                return None;
            }
        };
        match serde_json::from_str::<ReplayIndex>(&raw) {
            Ok(mut index) => {
                index.reindex();
                Some(index)
            }
            Err(e) => {
                warn!(cache = %path.display(), error = %e, "replay cache corrupted, rebuilding");
                None
            }
        }
    }

    fn is_fresh(&self, source: &Path, fingerprint: SourceFingerprint, model_id: &str) -> bool {
        self.version == CACHE_VERSION
            && self.source.as_path() == source
            && self.fingerprint == fingerprint
            && self.model_id == model_id
            && self.entries.iter().all(|e| !e.embedding.is_empty())
            && self.dims_consistent()
    }

    fn dims_consistent(&self) -> bool {
        let mut dims = self.entries.iter().map(|e| e.embedding.len());
        match dims.next() {
            Some(first) => dims.all(|d| d == first),
            None => true,
        }
    }

    async fn rebuild(
        source: &Path,
        source_id: PathBuf,
        fingerprint: SourceFingerprint,
        embedder: &dyn EmbeddingBackend,
        previous: Option<&ReplayIndex>,
    ) -> anyhow::Result<(ReplayIndex, BuildStats)> {
        let pairs = qa_pairs(&load_transcript(source)?);
        let reusable: HashMap<&str, &[f32]> = previous
            .filter(|p| p.model_id == embedder.model_id())
            .map(|p| {
                p.entries
                    .iter()
                    .filter(|e| !e.embedding.is_empty())
                    .map(|e| (e.normalized.as_str(), e.embedding.as_slice()))
                    .collect()
            })
            .unwrap_or_default();

        // 维度以上次缓存为准，没有缓存时由首个新向量确定
        let mut dims: Option<usize> = reusable.values().next().map(|v| v.len());
        let mut stats = BuildStats::default();
        let mut backend_down = false;
        let mut entries = Vec::new();
        for (normalized, pair) in dedupe_last_wins(pairs, extract_final_question) {
            let cached = reusable
                .get(normalized.as_str())
                .filter(|v| dims == Some(v.len()))
                .map(|v| v.to_vec());
            // 记录中自带的向量来源未知，只在维度一致时采用
            let carried = pair
                .embedding
                .clone()
                .filter(|v| !v.is_empty() && dims == Some(v.len()));
            if cached.is_none() && carried.is_none() {
                if let Some(v) = pair.embedding.as_ref().filter(|v| !v.is_empty()) {
                    debug!(
                        question = %normalized,
                        dims = v.len(),
                        expected = ?dims,
                        "transcript embedding not usable, re-embedding"
                    );
                }
            }
            let embedding = if let Some(v) = cached.or(carried) {
                stats.reused += 1;
                v
            } else if backend_down {
                stats.failed += 1;
                Vec::new()
            } else {
                match embedder.embed(&normalized).await {
                    Ok(v) if !v.is_empty() && dims.map_or(true, |d| d == v.len()) => {
                        if dims.is_none() {
                            dims = Some(v.len());
                        }
                        stats.embedded += 1;
                        v
                    }
                    Ok(v) => {
                        warn!(dims = v.len(), expected = ?dims, "unexpected embedding dimension");
                        stats.failed += 1;
                        Vec::new()
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            "embedding backend failed, remaining entries left for next build"
                        );
                        backend_down = true;
                        stats.failed += 1;
                        Vec::new()
                    }
                }
            };
            entries.push(IndexEntry {
                question_text: pair.question,
                normalized,
                embedding,
                answer_text: pair.answer,
                step_id: pair.step_id,
                position: pair.position,
            });
        }

        let mut index = ReplayIndex {
            version: CACHE_VERSION,
            source: source_id,
            fingerprint,
            model_id: embedder.model_id().to_string(),
            entries,
            by_normalized: HashMap::new(),
        };
        index.reindex();
        Ok((index, stats))
    }

    fn persist(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建缓存目录失败: {}", parent.display()))?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, serde_json::to_vec(self)?)
            .with_context(|| format!("写入缓存失败: {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("替换缓存失败: {}", path.display()))?;
        Ok(())
    }

    fn reindex(&mut self) {
        self.by_normalized = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.normalized.clone(), i))
            .collect();
    }

    /// 按规范化问题取索引项
    pub fn get(&self, normalized: &str) -> Option<&IndexEntry> {
        self.by_normalized.get(normalized).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
