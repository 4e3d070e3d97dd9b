//! 脚本化平台（测试与离线演练用，不发网络请求）
//!
//! 步骤列表固定；每次 submit_turn 从脚本队列取一个结果，队列用尽后返回 Terminal。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::SessionError;
use crate::platform::{InitOutcome, PlatformApi, StepDescriptor, SubmitOutcome};

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Reply(String),
    Skip { next: Option<String>, text: Option<String> },
    Terminal(Option<String>),
    Fail(SessionError),
}

#[derive(Debug, Default)]
pub struct ScriptedPlatform {
    steps: Vec<StepDescriptor>,
    openings: HashMap<String, InitOutcome>,
    list_failures: Mutex<VecDeque<SessionError>>,
    init_failures: Mutex<VecDeque<SessionError>>,
    replies: Mutex<VecDeque<ScriptedReply>>,
    submissions: Mutex<Vec<(String, String)>>,
    inits: Mutex<Vec<String>>,
    submit_delay: Option<Duration>,
}

impl ScriptedPlatform {
    pub fn new<S: AsRef<str>>(step_ids: &[S]) -> Self {
        Self {
            steps: step_ids
                .iter()
                .enumerate()
                .map(|(i, id)| StepDescriptor::new(id.as_ref(), i))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_opening(mut self, step_id: &str, text: &str) -> Self {
        self.openings
            .entry(step_id.to_string())
            .or_default()
            .opening = Some(text.to_string());
        self
    }

    /// runCard 返回 needSkipStep
    pub fn with_init_skip(mut self, step_id: &str) -> Self {
        self.openings.entry(step_id.to_string()).or_default().skip_signal = true;
        self
    }

    /// 步骤列表中声明 skip
    pub fn with_declared_skip(mut self, step_id: &str) -> Self {
        if let Some(step) = self.steps.iter_mut().find(|s| s.step_id == step_id) {
            step.skip_signal = true;
        }
        self
    }

    pub fn with_list_failure(self, err: SessionError) -> Self {
        push(&self.list_failures, err);
        self
    }

    pub fn with_init_failure(self, err: SessionError) -> Self {
        push(&self.init_failures, err);
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    pub fn then(self, reply: ScriptedReply) -> Self {
        push(&self.replies, reply);
        self
    }

    pub fn then_reply(self, text: &str) -> Self {
        self.then(ScriptedReply::Reply(text.to_string()))
    }

    pub fn then_skip(self, next: Option<&str>) -> Self {
        self.then(ScriptedReply::Skip {
            next: next.map(String::from),
            text: None,
        })
    }

    pub fn then_terminal(self) -> Self {
        self.then(ScriptedReply::Terminal(None))
    }

    pub fn then_fail(self, err: SessionError) -> Self {
        self.then(ScriptedReply::Fail(err))
    }

    /// 收到的 (stepId, text) 提交，含失败的尝试
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submissions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// 依次初始化过的步骤
    pub fn inits(&self) -> Vec<String> {
        self.inits.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    if let Ok(mut q) = queue.lock() {
        q.push_back(item);
    }
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().ok().and_then(|mut q| q.pop_front())
}

#[async_trait]
impl PlatformApi for ScriptedPlatform {
    async fn list_steps(&self, _task_id: &str) -> Result<Vec<StepDescriptor>, SessionError> {
        if let Some(err) = pop(&self.list_failures) {
            return Err(err);
        }
        Ok(self.steps.clone())
    }

    async fn init_step(&self, _task_id: &str, step_id: &str) -> Result<InitOutcome, SessionError> {
        if let Some(err) = pop(&self.init_failures) {
            return Err(err);
        }
        if let Ok(mut inits) = self.inits.lock() {
            inits.push(step_id.to_string());
        }
        Ok(self
            .openings
            .get(step_id)
            .cloned()
            .unwrap_or_else(|| InitOutcome {
                opening: Some(format!("步骤 {step_id} 开始，请作答？")),
                ..InitOutcome::default()
            }))
    }

    async fn submit_turn(
        &self,
        _task_id: &str,
        step_id: &str,
        text: &str,
    ) -> Result<SubmitOutcome, SessionError> {
        if let Ok(mut subs) = self.submissions.lock() {
            subs.push((step_id.to_string(), text.to_string()));
        }
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        match pop(&self.replies) {
            Some(ScriptedReply::Reply(text)) => Ok(SubmitOutcome::Reply { text }),
            Some(ScriptedReply::Skip { next, text }) => Ok(SubmitOutcome::Skip {
                next_step_id: next,
                text,
            }),
            Some(ScriptedReply::Terminal(text)) => Ok(SubmitOutcome::Terminal { text }),
            Some(ScriptedReply::Fail(err)) => Err(err),
            None => Ok(SubmitOutcome::Terminal { text: None }),
        }
    }
}
