//! 会话状态与对外投影
//!
//! Session 由一次编排运行独占并逐轮修改；SessionSnapshot 是其只读投影，
//! 每次状态变化后经 SessionSupervisor 的 watch 通道发布给监管方。

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Running,
    /// 到达暂停点，等待监管方恢复
    AwaitingInput,
    Completed,
    Failed,
}

/// 会话未走到平台终点就停止的原因（状态记为 Completed，记录完整保留）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// 达到单会话轮数上限
    TurnLimit,
    /// 回答来源耗尽（预设用完、操作员退出）
    SourceExhausted,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub task_id: String,
    pub persona_key: String,
    pub current_step_id: Option<String>,
    /// 当前步骤在步骤列表中的下标
    pub step_cursor: usize,
    /// 已完成的轮数
    pub turn_index: u32,
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
    pub turns_recorded: usize,
}

impl Session {
    pub fn new(task_id: &str, persona_key: &str) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            persona_key: persona_key.to_string(),
            current_step_id: None,
            step_cursor: 0,
            turn_index: 0,
            status: SessionStatus::Running,
            stop_reason: None,
            last_error: None,
            turns_recorded: 0,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            persona_key: self.persona_key.clone(),
            step_id: self.current_step_id.clone(),
            step_cursor: self.step_cursor,
            turn_index: self.turn_index,
            status: self.status,
            stop_reason: self.stop_reason,
            last_error: self.last_error.clone(),
            turns_recorded: self.turns_recorded,
        }
    }
}

/// 会话状态快照（供监管方 / 界面读取）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub persona_key: String,
    pub step_id: Option<String>,
    pub step_cursor: usize,
    pub turn_index: u32,
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
    pub turns_recorded: usize,
}

impl SessionSnapshot {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Failed)
    }
}
