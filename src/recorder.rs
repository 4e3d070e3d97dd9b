//! 对话记录落盘
//!
//! 每个会话写两份：可读文本 `_dialogue.txt`（可手工修改后用于回放）与结构化 `_dialogue.jsonl`。
//! runCard 的请求与结果另写 `_runcard.txt`，便于排查步骤初始化。
//! 目录布局：`<log_dir>/task_<taskId>/<personaKey>/task_<taskId>_<时间戳>_*`

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::SessionError;
use crate::platform::InitOutcome;
use crate::transcript::{render_jsonl, render_text, Turn, SEPARATOR, TIMESTAMP_FORMAT};

/// 一次 runCard 调用；outcome 与 error 二选一
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunCardEntry {
    pub timestamp: DateTime<Local>,
    pub task_id: String,
    pub step_id: String,
    pub outcome: Option<InitOutcome>,
    pub error: Option<String>,
}

impl RunCardEntry {
    pub fn new(task_id: &str, step_id: &str, result: Result<&InitOutcome, &SessionError>) -> Self {
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            timestamp: Local::now(),
            task_id: task_id.to_string(),
            step_id: step_id.to_string(),
            outcome,
            error,
        }
    }

    fn render(&self) -> anyhow::Result<String> {
        let request = serde_json::json!({ "taskId": self.task_id, "stepId": self.step_id });
        let result = match (&self.outcome, &self.error) {
            (_, Some(err)) => format!("错误: {}", err.replace('\n', " ")),
            (Some(outcome), None) => format!("响应: {}", serde_json::to_string(outcome)?),
            (None, None) => "响应: null".to_string(),
        };
        Ok(format!(
            "[{}] runCard | Step {}\n请求: {request}\n{result}\n{SEPARATOR}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.step_id
        ))
    }
}

/// 只追加的对话记录器
pub trait Recorder: Send {
    fn append(&mut self, turn: &Turn) -> anyhow::Result<()>;

    /// 记录一次步骤初始化调用；默认不记录
    fn record_run_card(&mut self, _entry: &RunCardEntry) -> anyhow::Result<()> {
        Ok(())
    }

    /// 记录文件位置（内存记录器没有）
    fn location(&self) -> Option<&Path> {
        None
    }
}

pub struct FileRecorder {
    text_path: PathBuf,
    jsonl_path: PathBuf,
    run_card_path: PathBuf,
    text: File,
    jsonl: File,
    run_card: File,
}

impl FileRecorder {
    pub fn create(
        log_dir: &Path,
        task_id: &str,
        persona_key: &str,
        persona_label: &str,
    ) -> anyhow::Result<Self> {
        let dir = log_dir
            .join(format!("task_{task_id}"))
            .join(persona_key);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("创建日志目录失败: {}", dir.display()))?;

        let now = Local::now();
        let stem = format!("task_{task_id}_{}", now.format("%Y%m%d_%H%M%S"));
        let text_path = dir.join(format!("{stem}_dialogue.txt"));
        let jsonl_path = dir.join(format!("{stem}_dialogue.jsonl"));
        let run_card_path = dir.join(format!("{stem}_runcard.txt"));

        let open = |path: &Path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("打开日志文件失败: {}", path.display()))
        };
        let mut text = open(&text_path)?;
        let jsonl = open(&jsonl_path)?;
        let run_card = open(&run_card_path)?;

        writeln!(
            text,
            "对话记录\n日志创建时间: {}\ntask_id: {}\n学生角色: {}\n{}",
            now.format(TIMESTAMP_FORMAT),
            task_id,
            persona_label,
            "=".repeat(80)
        )?;
        text.flush()?;

        tracing::info!(path = %text_path.display(), "Transcript log created");
        Ok(Self {
            text_path,
            jsonl_path,
            run_card_path,
            text,
            jsonl,
            run_card,
        })
    }

    pub fn jsonl_path(&self) -> &Path {
        &self.jsonl_path
    }

    pub fn run_card_path(&self) -> &Path {
        &self.run_card_path
    }
}

impl Recorder for FileRecorder {
    fn append(&mut self, turn: &Turn) -> anyhow::Result<()> {
        self.text.write_all(render_text(turn).as_bytes())?;
        self.text.flush()?;
        writeln!(self.jsonl, "{}", render_jsonl(turn)?)?;
        self.jsonl.flush()?;
        Ok(())
    }

    fn record_run_card(&mut self, entry: &RunCardEntry) -> anyhow::Result<()> {
        self.run_card.write_all(entry.render()?.as_bytes())?;
        self.run_card.flush()?;
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.text_path)
    }
}

/// 内存记录器；克隆共享同一份记录
#[derive(Clone, Default)]
pub struct MemoryRecorder {
    turns: Arc<Mutex<Vec<Turn>>>,
    run_cards: Arc<Mutex<Vec<RunCardEntry>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn run_cards(&self) -> Vec<RunCardEntry> {
        self.run_cards.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Recorder for MemoryRecorder {
    fn append(&mut self, turn: &Turn) -> anyhow::Result<()> {
        self.turns
            .lock()
            .map_err(|_| anyhow::anyhow!("memory recorder poisoned"))?
            .push(turn.clone());
        Ok(())
    }

    fn record_run_card(&mut self, entry: &RunCardEntry) -> anyhow::Result<()> {
        self.run_cards
            .lock()
            .map_err(|_| anyhow::anyhow!("memory recorder poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{load_transcript, qa_pairs};

    #[test]
    fn test_file_recorder_layout_and_both_renderings_parse() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = FileRecorder::create(dir.path(), "T1", "S3", "S3 高需求的完美主义者").unwrap();
        rec.append(&Turn::ai("s1", 0, "你准备好了吗？")).unwrap();
        rec.append(&Turn::student("s1", 1, "好的").with_origin("generated")).unwrap();

        let text_path = rec.location().unwrap().to_path_buf();
        assert!(text_path.starts_with(dir.path().join("task_T1").join("S3")));
        let header = std::fs::read_to_string(&text_path).unwrap();
        assert!(header.contains("学生角色: S3 高需求的完美主义者"));

        let from_text = load_transcript(&text_path).unwrap();
        let from_jsonl = load_transcript(rec.jsonl_path()).unwrap();
        assert_eq!(from_text.len(), 2);
        assert_eq!(from_jsonl.len(), 2);
        assert_eq!(qa_pairs(&from_text), qa_pairs(&from_jsonl));
    }

    #[test]
    fn test_run_card_log_keeps_request_and_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = FileRecorder::create(dir.path(), "T1", "S1", "S1 学生").unwrap();
        let opened = InitOutcome {
            opening: Some("欢迎来到泵站实训。".to_string()),
            ..InitOutcome::default()
        };
        rec.record_run_card(&RunCardEntry::new("T1", "s1", Ok(&opened))).unwrap();
        let err = SessionError::Authentication("token expired".to_string());
        rec.record_run_card(&RunCardEntry::new("T1", "s2", Err(&err))).unwrap();

        let path = rec.run_card_path().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_runcard.txt"));
        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("runCard | Step s1"));
        assert!(log.contains(r#""stepId":"s1""#));
        assert!(log.contains("欢迎来到泵站实训。"));
        assert!(log.contains("runCard | Step s2"));
        assert!(log.contains("错误:"));
        // runCard 日志不混入对话记录
        assert!(load_transcript(rec.location().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_memory_recorder_shares_turns_across_clones() {
        let rec = MemoryRecorder::new();
        let mut writer = rec.clone();
        writer.append(&Turn::ai("s1", 0, "你好")).unwrap();
        assert_eq!(rec.turns().len(), 1);
    }
}
