//! 对话记录：Turn 数据结构、两种落盘格式（可读文本 / JSONL）及解析
//!
//! 可读文本格式（每轮一块，可手工修改回答后用于回放）：
//!
//! ```text
//! [2026-10-18 10:00:00] Step step-1 | 第 1 轮 | 学生 | 来源: generated
//! 我觉得是进口压力太低
//! --------------------------------------------------------------------------------
//! ```
//!
//! 也兼容旧版日志：`[时间] Step id | 第 N 轮 | 来源: chat` 下接 `用户: ...` / `AI: ...` 行。

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Ai,
    Student,
}

impl TurnRole {
    pub fn label(&self) -> &'static str {
        match self {
            TurnRole::Ai => "AI",
            TurnRole::Student => "学生",
        }
    }
}

/// 对话中的一条记录（AI 发言或学生回答）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// 在本会话记录中的序号，从 0 开始连续递增
    #[serde(default)]
    pub seq: u64,
    /// 所属轮次：开场白为当前已完成轮数，学生回答及其后的 AI 回复为新的轮数
    pub turn_index: u32,
    pub role: TurnRole,
    pub text: String,
    pub step_id: String,
    pub timestamp: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// 轮次级错误标记（如生成失败、提交失败）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 学生回答的来源（manual / preset / generated / replayed）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Turn {
    pub fn ai(step_id: &str, turn_index: u32, text: impl Into<String>) -> Self {
        Self::new(TurnRole::Ai, step_id, turn_index, text.into())
    }

    pub fn student(step_id: &str, turn_index: u32, text: impl Into<String>) -> Self {
        Self::new(TurnRole::Student, step_id, turn_index, text.into())
    }

    fn new(role: TurnRole, step_id: &str, turn_index: u32, text: String) -> Self {
        Self {
            seq: 0,
            turn_index,
            role,
            text,
            step_id: step_id.to_string(),
            timestamp: Local::now(),
            embedding: None,
            error: None,
            origin: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 单个会话的内存记录：只追加，序号由这里分配
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut turn: Turn) -> &Turn {
        turn.seq = self.turns.len() as u64;
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// 回放用的问答对：学生回答 + 它之前最近的一条 AI 发言
#[derive(Clone, Debug, PartialEq)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    pub step_id: String,
    /// 在记录中出现的先后（用于同分时取最早）
    pub position: usize,
    /// 结构化记录里附带的问题向量
    pub embedding: Option<Vec<f32>>,
}

/// 从记录中提取问答对；带错误标记或空白的学生回答不参与
pub fn qa_pairs(turns: &[Turn]) -> Vec<QaPair> {
    let mut pairs = Vec::new();
    let mut last_question: Option<&Turn> = None;
    for turn in turns {
        match turn.role {
            TurnRole::Ai => {
                if !turn.text.trim().is_empty() {
                    last_question = Some(turn);
                }
            }
            TurnRole::Student => {
                if turn.is_error() || turn.text.trim().is_empty() {
                    continue;
                }
                if let Some(q) = last_question.take() {
                    pairs.push(QaPair {
                        question: q.text.clone(),
                        answer: turn.text.trim().to_string(),
                        step_id: turn.step_id.clone(),
                        position: pairs.len(),
                        embedding: q.embedding.clone(),
                    });
                }
            }
        }
    }
    pairs
}

/// 渲染单条记录为可读文本块
pub fn render_text(turn: &Turn) -> String {
    let mut header = format!(
        "[{}] Step {} | 第 {} 轮 | {}",
        turn.timestamp.format(TIMESTAMP_FORMAT),
        turn.step_id,
        turn.turn_index,
        turn.role.label()
    );
    if let Some(origin) = &turn.origin {
        header.push_str(&format!(" | 来源: {origin}"));
    }
    if let Some(err) = &turn.error {
        header.push_str(&format!(" | 错误: {}", err.replace('\n', " ")));
    }
    format!("{header}\n{}\n{SEPARATOR}\n", turn.text)
}

/// 渲染单条记录为一行 JSON
pub fn render_jsonl(turn: &Turn) -> anyhow::Result<String> {
    Ok(serde_json::to_string(turn)?)
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^\[(?P<ts>[^\]]+)\] Step (?P<step>\S+)",
            r"(?: \| 第 (?P<turn>\d+) 轮)?(?P<rest>(?: \| .*)?)$",
        ))
        .expect("valid header regex")
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Local> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .unwrap_or_else(Local::now)
}

struct Block {
    timestamp: DateTime<Local>,
    step_id: String,
    turn_index: u32,
    role: Option<TurnRole>,
    origin: Option<String>,
    error: Option<String>,
    lines: Vec<String>,
}

impl Block {
    fn into_turns(self, out: &mut Vec<Turn>) {
        match self.role {
            Some(role) => {
                let text = self.lines.join("\n").trim().to_string();
                out.push(Turn {
                    seq: out.len() as u64,
                    turn_index: self.turn_index,
                    role,
                    text,
                    step_id: self.step_id,
                    timestamp: self.timestamp,
                    embedding: None,
                    error: self.error,
                    origin: self.origin,
                });
            }
            // 旧版日志：同一块内先「用户」后「AI」；无前缀的行续接上一条
            None => {
                let mut entries: Vec<(TurnRole, Vec<&str>)> = Vec::new();
                for line in &self.lines {
                    if let Some(t) = line.strip_prefix("用户:") {
                        entries.push((TurnRole::Student, vec![t]));
                    } else if let Some(t) = line.strip_prefix("AI:") {
                        entries.push((TurnRole::Ai, vec![t]));
                    } else if let Some((_, body)) = entries.last_mut() {
                        body.push(line);
                    }
                }
                for (role, body) in entries {
                    out.push(Turn {
                        seq: out.len() as u64,
                        turn_index: self.turn_index,
                        role,
                        text: body.join("\n").trim().to_string(),
                        step_id: self.step_id.clone(),
                        timestamp: self.timestamp,
                        embedding: None,
                        error: None,
                        origin: self.origin.clone(),
                    });
                }
            }
        }
    }
}

/// 解析可读文本记录；文件头（标题、创建时间等）与无法识别的行被忽略
pub fn parse_text(content: &str) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut current: Option<Block> = None;

    for line in content.lines() {
        if let Some(caps) = header_re().captures(line) {
            if let Some(block) = current.take() {
                block.into_turns(&mut turns);
            }
            let mut block = Block {
                timestamp: parse_timestamp(&caps["ts"]),
                step_id: caps["step"].to_string(),
                turn_index: caps
                    .name("turn")
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0),
                role: None,
                origin: None,
                error: None,
                lines: Vec::new(),
            };
            for field in caps["rest"].split(" | ").map(str::trim).filter(|f| !f.is_empty()) {
                match field {
                    "AI" => block.role = Some(TurnRole::Ai),
                    "学生" | "用户" => block.role = Some(TurnRole::Student),
                    f => {
                        if let Some(v) = f.strip_prefix("来源:") {
                            block.origin = Some(v.trim().to_string());
                        } else if let Some(v) = f.strip_prefix("错误:") {
                            block.error = Some(v.trim().to_string());
                        }
                    }
                }
            }
            current = Some(block);
        } else if line.len() >= 10 && line.chars().all(|c| c == '-') {
            if let Some(block) = current.take() {
                block.into_turns(&mut turns);
            }
        } else if let Some(block) = current.as_mut() {
            block.lines.push(line.to_string());
        }
    }
    if let Some(block) = current.take() {
        block.into_turns(&mut turns);
    }
    turns
}

/// 解析 JSONL 记录；空行跳过，坏行报错并带行号
pub fn parse_jsonl(content: &str) -> anyhow::Result<Vec<Turn>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str::<Turn>(l).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}

/// 按扩展名选择解析方式：.jsonl / .json 为结构化，其余按可读文本
pub fn load_transcript(path: &Path) -> anyhow::Result<Vec<Turn>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取对话记录失败: {}", path.display()))?;
    let structured = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl") | Some("json")
    );
    if structured {
        parse_jsonl(&content).with_context(|| format!("解析对话记录失败: {}", path.display()))
    } else {
        Ok(parse_text(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Turn> {
        vec![
            Turn::ai("s1", 0, "欢迎来到泵站实训。你准备好了吗？"),
            Turn::student("s1", 1, "准备好了").with_origin("generated"),
            Turn::ai("s1", 1, "汽蚀现象是什么原因造成的？"),
            Turn::student("s1", 2, "进口压力低于饱和蒸汽压"),
            Turn::ai("s2", 2, "请选择A或B"),
            Turn::student("s2", 3, "").with_error("生成失败"),
        ]
    }

    #[test]
    fn test_qa_pairs_pair_with_preceding_ai_turn() {
        let pairs = qa_pairs(&sample());
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].answer, "准备好了");
        assert_eq!(pairs[1].question, "汽蚀现象是什么原因造成的？");
        assert_eq!(pairs[1].step_id, "s1");
        assert_eq!(pairs[1].position, 1);
    }

    #[test]
    fn test_text_rendering_parses_back() {
        let turns = sample();
        let mut text = String::from("对话记录\n日志创建时间: 2026-10-18 10:00:00\n====\n");
        for t in &turns {
            text.push_str(&render_text(t));
        }
        let parsed = parse_text(&text);
        assert_eq!(parsed.len(), turns.len());
        assert_eq!(parsed[1].role, TurnRole::Student);
        assert_eq!(parsed[1].origin.as_deref(), Some("generated"));
        assert_eq!(parsed[3].text, "进口压力低于饱和蒸汽压");
        assert_eq!(parsed[3].turn_index, 2);
        assert_eq!(parsed[5].error.as_deref(), Some("生成失败"));
        assert_eq!(qa_pairs(&parsed).len(), 2);
    }

    #[test]
    fn test_hand_edited_multiline_answer() {
        let text = "\
[2026-10-18 10:00:00] Step s1 | 第 0 轮 | AI
请简述离心泵的启动步骤？
--------------------------------------------------------------------------------
[2026-10-18 10:00:05] Step s1 | 第 1 轮 | 用户
先灌泵排气，
再关闭出口阀启动。
--------------------------------------------------------------------------------
";
        let pairs = qa_pairs(&parse_text(text));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].answer, "先灌泵排气，\n再关闭出口阀启动。");
    }

    #[test]
    fn test_legacy_log_format() {
        let text = "\
[2025-11-02 09:00:00] Step s1 | 来源: runCard
AI: 你是学生还是老师？
--------------------------------------------------------------------------------
[2025-11-02 09:00:03] Step s1 | 第 1 轮 | 来源: chat
用户: 学生
AI: 好的，我们开始吧。汽蚀是什么？
--------------------------------------------------------------------------------
";
        let turns = parse_text(text);
        assert_eq!(turns.len(), 3);
        let pairs = qa_pairs(&turns);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question, "你是学生还是老师？");
        assert_eq!(pairs[0].answer, "学生");
    }

    #[test]
    fn test_legacy_multiline_ai_text_keeps_final_question() {
        let text = "\
[2025-11-02 09:00:00] Step s1 | 来源: runCard
AI: 欢迎来到泵站实训。
首先回顾一下上节课的内容。
汽蚀现象是什么原因造成的？
--------------------------------------------------------------------------------
[2025-11-02 09:00:08] Step s1 | 第 1 轮 | 来源: chat
用户: 进口压力太低
导致液体汽化
AI: 很好。
--------------------------------------------------------------------------------
";
        let turns = parse_text(text);
        assert_eq!(turns.len(), 3);
        assert!(turns[0].text.starts_with("欢迎来到泵站实训。"));
        assert!(turns[0].text.ends_with("汽蚀现象是什么原因造成的？"));

        let pairs = qa_pairs(&turns);
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].question.contains("汽蚀"));
        assert_eq!(pairs[0].answer, "进口压力太低\n导致液体汽化");
    }

    #[test]
    fn test_jsonl_roundtrip_keeps_embedding() {
        let mut turn = Turn::ai("s1", 0, "问题？");
        turn.embedding = Some(vec![0.5, 0.25]);
        let line = render_jsonl(&turn).unwrap();
        let parsed = parse_jsonl(&format!("{line}\n\n")).unwrap();
        assert_eq!(parsed[0].embedding, Some(vec![0.5, 0.25]));
    }

    #[test]
    fn test_jsonl_bad_line_reports_error() {
        assert!(parse_jsonl("{not json}").is_err());
    }

    #[test]
    fn test_transcript_assigns_contiguous_seq() {
        let mut t = Transcript::new();
        for turn in sample() {
            t.push(turn);
        }
        let seqs: Vec<u64> = t.turns().iter().map(|t| t.seq).collect();
        assert_eq!(seqs, (0..6).collect::<Vec<_>>());
    }
}
