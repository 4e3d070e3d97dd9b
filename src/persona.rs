//! 学生角色（Persona）注册表
//!
//! 内置 S1–S5 五种性格，也可从 TOML 文件加载自定义角色：
//!
//! ```toml
//! default = "S1"
//!
//! [[persona]]
//! key = "S1"
//! label = "S1 沉默寡言的学生"
//! description = "内向不主动表达"
//! style = "语气克制"
//! sample_utterances = ["嗯", "不知道"]
//! ```
//!
//! 注册表构建后只读，通过 `Arc<Persona>` 在并发会话间共享。

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use crate::core::SessionError;

pub const DEFAULT_PERSONA_KEY: &str = "S2";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Persona {
    pub key: String,
    pub label: String,
    pub description: String,
    #[serde(default)]
    pub speech_habit: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub test_goal: String,
    /// 额外约束，逐条写进提示词
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub sample_utterances: Vec<String>,
}

fn builtin(
    key: &str,
    label: &str,
    description: &str,
    speech_habit: &str,
    style: &str,
    test_goal: &str,
    samples: &[&str],
) -> Persona {
    Persona {
        key: key.to_string(),
        label: label.to_string(),
        description: description.to_string(),
        speech_habit: speech_habit.to_string(),
        style: style.to_string(),
        test_goal: test_goal.to_string(),
        constraints: Vec::new(),
        sample_utterances: samples.iter().map(|s| s.to_string()).collect(),
    }
}

#[derive(Deserialize)]
struct PersonaFile {
    default: Option<String>,
    #[serde(rename = "persona", default)]
    personas: Vec<Persona>,
}

#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Arc<Persona>>,
    default_key: String,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaRegistry {
    /// 内置五种学生性格
    pub fn builtin() -> Self {
        let personas = vec![
            builtin(
                "S1",
                "S1 沉默寡言的学生",
                "内向不主动表达，只给最简短的回应，常用词重复。",
                "常说“嗯”“好”“不知道”，回答多为 1-2 句甚至只有词语。",
                "语气克制、信息量少，除非被追问不会展开。",
                "测试 AI 是否能主动引导、追问，避免对话中断。",
                &["嗯。", "不知道。", "好吧。"],
            ),
            builtin(
                "S2",
                "S2 话多跑题的学生",
                "兴奋健谈，喜欢分享各种细节，常把话题带离当前问题。",
                "回答冗长跳跃，经常夹杂与问题弱相关的经历或感受。",
                "语速快、情绪高涨，想到什么就说什么，很难保持中心。",
                "测试 AI 的话题收束能力和耐心引导能力。",
                &["这个我知道！我上次实习的时候也遇到过……"],
            ),
            builtin(
                "S3",
                "S3 高需求的完美主义者",
                "对答案极度挑剔，持续追问细节并要求更多示例。",
                "习惯反复追问“还有吗”“能具体点吗”，不断强调标准要更高。",
                "语气苛求且严谨，总在寻找不足之处。",
                "测试 AI 的深度解答能力和面对高标准的应对策略。",
                &["还有吗？能再具体一点吗？"],
            ),
            builtin(
                "S4",
                "S4 逻辑挑刺型学生",
                "喜欢找 AI 的矛盾或漏洞，专注于质疑和反驳。",
                "习惯先指出不合理点，再要求给解释，甚至抛出反例。",
                "语气犀利爱辩论，动不动就说“这说不通”。",
                "测试 AI 的逻辑一致性与抗质疑能力。",
                &["可你刚才不是这么说的。"],
            ),
            builtin(
                "S5",
                "S5 情绪化学生",
                "情绪波动大，容易沮丧或生气，语言夹杂情绪词汇。",
                "会突然表达“我快崩溃了”“太让人失望”等感受。",
                "语气带情绪色彩，时而激动时而低落。",
                "测试 AI 的情绪安抚与正向引导能力。",
                &["我快崩溃了，怎么又错了。"],
            ),
        ];
        Self {
            personas: personas.into_iter().map(Arc::new).collect(),
            default_key: DEFAULT_PERSONA_KEY.to_string(),
        }
    }

    /// 从 TOML 文件加载；未指定 default 时取第一个角色
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取角色文件失败: {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("解析角色文件失败: {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let file: PersonaFile = toml::from_str(raw)?;
        let mut personas: Vec<Arc<Persona>> = Vec::new();
        for p in file.personas {
            if personas.iter().any(|e| e.key == p.key) {
                anyhow::bail!("duplicate persona key: {}", p.key);
            }
            personas.push(Arc::new(p));
        }
        let first = personas
            .first()
            .map(|p| p.key.clone())
            .ok_or_else(|| anyhow::anyhow!("persona file defines no personas"))?;
        let default_key = file.default.unwrap_or(first);
        if !personas.iter().any(|p| p.key == default_key) {
            anyhow::bail!("default persona '{}' is not defined", default_key);
        }
        Ok(Self {
            personas,
            default_key,
        })
    }

    pub fn get(&self, key: &str) -> Option<Arc<Persona>> {
        self.personas.iter().find(|p| p.key == key).cloned()
    }

    pub fn default_persona(&self) -> Arc<Persona> {
        self.get(&self.default_key)
            .unwrap_or_else(|| Arc::clone(&self.personas[0]))
    }

    /// 菜单顺序（1 开始编号）
    pub fn all(&self) -> &[Arc<Persona>] {
        &self.personas
    }

    /// 按角色 key 或菜单编号（"1,3" / "S1"）选择；去重保序，空选择返回默认角色
    pub fn select<S: AsRef<str>>(
        &self,
        selections: &[S],
    ) -> Result<Vec<Arc<Persona>>, SessionError> {
        let mut chosen: Vec<Arc<Persona>> = Vec::new();
        let items = selections
            .iter()
            .flat_map(|s| s.as_ref().split([',', '，']))
            .map(str::trim)
            .filter(|s| !s.is_empty());
        for item in items {
            let persona = item
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| self.personas.get(i).cloned())
                .or_else(|| self.get(item))
                .or_else(|| self.get(&item.to_uppercase()))
                .ok_or_else(|| SessionError::Configuration(format!("未知的学生角色: {item}")))?;
            if !chosen.iter().any(|p| p.key == persona.key) {
                chosen.push(persona);
            }
        }
        if chosen.is_empty() {
            chosen.push(self.default_persona());
        }
        Ok(chosen)
    }

    /// 交互菜单文本
    pub fn menu(&self) -> String {
        self.personas
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {} - {}", i + 1, p.label, p.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
