//! 训练平台 HTTP 客户端
//!
//! 所有接口均为 JSON POST，响应包在 `{code, success, msg, data}` 信封里。
//! 单次请求不设超时，由 RetryController 按尝试次数递增的超时包裹。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, COOKIE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::PlatformSection;
use crate::core::SessionError;
use crate::platform::{InitOutcome, PlatformApi, StepDescriptor, SubmitOutcome};

const STEP_LIST_PATH: &str = "/teacher-course/abilityTrain/queryScriptStepList";
const RUN_CARD_PATH: &str = "/ai-tools/trainRun/runCard";
const CHAT_PATH: &str = "/ai-tools/trainRun/chat";

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize, Default)]
struct RunCardData {
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "needSkipStep", default)]
    need_skip_step: bool,
}

#[derive(Deserialize, Default)]
struct ChatData {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "needSkipStep", default)]
    need_skip_step: bool,
    #[serde(rename = "nextStepId", default)]
    next_step_id: Option<String>,
}

/// 业务层判定结果
enum Business<T> {
    Ok(Option<T>),
    Rejected(String),
}

pub struct HttpPlatformClient {
    http: reqwest::Client,
    base_url: String,
    has_credentials: bool,
    /// runCard 返回的平台会话 id，后续请求回传
    session_id: Mutex<Option<String>>,
}

impl HttpPlatformClient {
    pub fn new(section: &PlatformSection) -> Result<Self, SessionError> {
        let headers = build_headers(section)?;
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            has_credentials: section.authorization.is_some() || section.cookie.is_some(),
            session_id: Mutex::new(None),
        })
    }

    /// 新会话用的客户端：共享连接池，不共享平台 sessionId
    pub fn fork(&self) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            has_credentials: self.has_credentials,
            session_id: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    fn set_session_id(&self, id: Option<String>) {
        if let (Some(id), Ok(mut slot)) = (id, self.session_id.lock()) {
            *slot = Some(id);
        }
    }

    /// 连通性检查：凭据存在且服务器可访问（任意 HTTP 状态码均可）
    pub async fn probe(&self) -> Result<u16, SessionError> {
        if !self.has_credentials {
            return Err(SessionError::Configuration(
                "未找到 AUTHORIZATION 或 COOKIE".to_string(),
            ));
        }
        let response = self
            .http
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status().as_u16();
        info!(base_url = %self.base_url, status, "Platform reachable");
        Ok(status)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Business<T>, SessionError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, payload = %body, "platform request");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        match status.as_u16() {
            401 | 403 => return Err(SessionError::Authentication(format!("{path}: HTTP {status}"))),
            429 => return Err(SessionError::RateLimited(format!("{path}: HTTP {status}"))),
            s if s >= 500 => {
                return Err(SessionError::TransientNetwork(format!("{path}: HTTP {status}")))
            }
            _ if !status.is_success() => {
                return Err(SessionError::Rejected(format!(
                    "{path}: HTTP {status}: {}",
                    snippet(&text)
                )))
            }
            _ => {}
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|e| {
                SessionError::MalformedPayload(format!("{path}: {e}: {}", snippet(&text)))
            })?;
        debug!(%url, code = ?envelope.code, success = envelope.success, "platform response");

        let msg = envelope.msg.unwrap_or_default();
        match envelope.code {
            Some(401) | Some(403) => Err(SessionError::Authentication(format!("{path}: {msg}"))),
            Some(200) if envelope.success => Ok(Business::Ok(envelope.data)),
            code => Ok(Business::Rejected(format!("{path}: code {code:?}: {msg}"))),
        }
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}

fn map_transport_error(e: reqwest::Error) -> SessionError {
    if e.is_connect() {
        SessionError::Connect(e.to_string())
    } else {
        SessionError::TransientNetwork(e.to_string())
    }
}

fn build_headers(section: &PlatformSection) -> Result<HeaderMap, SessionError> {
    let invalid = |name: &str| SessionError::Configuration(format!("invalid header value: {name}"));
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&section.user_agent).map_err(|_| invalid("User-Agent"))?,
    );
    if let Some(auth) = &section.authorization {
        let value = HeaderValue::from_str(auth).map_err(|_| invalid("Authorization"))?;
        headers.insert(AUTHORIZATION, value);
    }
    if let Some(cookie) = &section.cookie {
        headers.insert(COOKIE, HeaderValue::from_str(cookie).map_err(|_| invalid("Cookie"))?);
    }
    for (name, value) in &section.custom_headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| SessionError::Configuration(format!("invalid header name: {name}")))?;
        headers.insert(header, HeaderValue::from_str(value).map_err(|_| invalid(name))?);
    }
    Ok(headers)
}

/// chat 响应到 SubmitOutcome 的映射
fn classify_chat(data: ChatData) -> SubmitOutcome {
    match (data.need_skip_step, data.next_step_id, data.text) {
        (true, Some(next), text) => SubmitOutcome::Skip {
            next_step_id: Some(next),
            text,
        },
        (true, None, text) => SubmitOutcome::Terminal { text },
        (false, None, None) => SubmitOutcome::Terminal { text: None },
        (false, _, text) => SubmitOutcome::Reply {
            text: text.unwrap_or_default(),
        },
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformClient {
    async fn list_steps(&self, task_id: &str) -> Result<Vec<StepDescriptor>, SessionError> {
        let body = json!({ "trainTaskId": task_id, "trainSubType": "ability" });
        match self.post::<Vec<StepDescriptor>>(STEP_LIST_PATH, body).await? {
            Business::Ok(steps) => Ok(steps
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(order, step)| StepDescriptor { order, ..step })
                .collect()),
            Business::Rejected(msg) => Err(SessionError::Rejected(msg)),
        }
    }

    async fn init_step(&self, task_id: &str, step_id: &str) -> Result<InitOutcome, SessionError> {
        let body = json!({
            "taskId": task_id,
            "stepId": step_id,
            "sessionId": self.session_id(),
        });
        match self.post::<RunCardData>(RUN_CARD_PATH, body).await? {
            Business::Ok(data) => {
                let data = data.unwrap_or_default();
                self.set_session_id(data.session_id);
                Ok(InitOutcome {
                    opening: data.text.filter(|t| !t.trim().is_empty()),
                    skip_signal: data.need_skip_step,
                    finished: false,
                })
            }
            Business::Rejected(msg) => {
                info!(step = step_id, %msg, "runCard declined, training finished");
                Ok(InitOutcome {
                    finished: true,
                    ..InitOutcome::default()
                })
            }
        }
    }

    async fn submit_turn(
        &self,
        task_id: &str,
        step_id: &str,
        text: &str,
    ) -> Result<SubmitOutcome, SessionError> {
        let body = json!({
            "taskId": task_id,
            "stepId": step_id,
            "text": text,
            "sessionId": self.session_id(),
        });
        match self.post::<ChatData>(CHAT_PATH, body).await? {
            Business::Ok(data) => Ok(classify_chat(data.unwrap_or_default())),
            Business::Rejected(msg) => Err(SessionError::Rejected(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(skip: bool, next: Option<&str>, text: Option<&str>) -> ChatData {
        ChatData {
            text: text.map(String::from),
            need_skip_step: skip,
            next_step_id: next.map(String::from),
        }
    }

    #[test]
    fn test_classify_chat() {
        assert_eq!(
            classify_chat(chat(true, Some("s2"), Some("进入下一步"))),
            SubmitOutcome::Skip {
                next_step_id: Some("s2".into()),
                text: Some("进入下一步".into())
            }
        );
        assert_eq!(
            classify_chat(chat(true, None, Some("再见"))),
            SubmitOutcome::Terminal {
                text: Some("再见".into())
            }
        );
        assert_eq!(
            classify_chat(chat(false, None, None)),
            SubmitOutcome::Terminal { text: None }
        );
        assert_eq!(
            classify_chat(chat(false, None, Some("继续说"))),
            SubmitOutcome::Reply {
                text: "继续说".into()
            }
        );
    }

    #[test]
    fn test_step_list_payload_parses() {
        let raw = r#"{"code":200,"success":true,"msg":"ok","data":[
            {"stepId":"a","stepName":"开场"},
            {"stepId":"b","needSkipStep":true}
        ]}"#;
        let env: Envelope<Vec<StepDescriptor>> = serde_json::from_str(raw).unwrap();
        let steps = env.data.unwrap();
        assert_eq!(steps[0].name.as_deref(), Some("开场"));
        assert!(steps[1].skip_signal);
    }

    #[test]
    fn test_headers_include_custom_entries() {
        let mut section = PlatformSection {
            authorization: Some("Bearer t".into()),
            cookie: Some("a=b".into()),
            ..PlatformSection::default()
        };
        section.custom_headers.insert("x-tenant".into(), "7".into());
        let headers = build_headers(&section).unwrap();
        assert_eq!(headers.get("x-tenant").unwrap(), "7");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer t");

        section.custom_headers.insert("bad header".into(), "x".into());
        assert!(matches!(build_headers(&section), Err(SessionError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_probe_requires_credentials() {
        let client = HttpPlatformClient::new(&PlatformSection::default()).unwrap();
        assert!(matches!(client.probe().await, Err(SessionError::Configuration(_))));
    }
}
