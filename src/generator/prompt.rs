//! 学生回答提示词组装

use crate::generator::{Exchange, ReferenceMaterial};
use crate::llm::Message;
use crate::persona::Persona;

const SYSTEM_PROMPT: &str = "你是一名能力训练助手，需要模拟学生角色进行回答。\
注意：性格特点应该自然融入对话，而非生硬套用，要保持回答的真实性和多样性。\
如果有角色示例对话，请优先引用或改写。";

const QUESTION_TYPE_RULES: &[&str] = &[
    "## 问题类型识别（优先级最高）",
    "如果当前问题属于以下类型，请优先直接回答，不需要强制体现性格特点：",
    "1. **确认式问题**: 如'你准备好了吗？请回复是或否'、'确认的话请回复是'",
    "   → 直接回答'是'、'好的'、'确认'等",
    "2. **选择式问题**: 如'你选择A还是B？'、'请选择1/2/3'",
    "   → 直接说出选项，如'我选择A'、'选1'",
    "3. **角色确认问题**: 如'你是学生还是老师？'",
    "   → 直接回答角色，如'学生'",
    "",
    "**判断标准**: 如果问题中包含'请回复'、'请选择'、'是或否'、'A/B/C'等明确指示，则为封闭式问题。",
    "",
];

fn persona_section(persona: &Persona, out: &mut Vec<String>) {
    out.push("## 角色设定".to_string());
    out.push(format!("学生角色: {}", persona.label));
    out.push(format!("角色特征: {}", persona.description));
    if !persona.speech_habit.is_empty() {
        out.push(format!("说话习惯: {}", persona.speech_habit));
    }
    if !persona.style.is_empty() {
        out.push(format!("表达风格: {}", persona.style));
    }
    if !persona.test_goal.is_empty() {
        out.push(format!("测试目的: {}", persona.test_goal));
    }
    for c in &persona.constraints {
        out.push(format!("约束: {c}"));
    }
    if !persona.sample_utterances.is_empty() {
        out.push(format!("典型说法: {}", persona.sample_utterances.join(" / ")));
    }
    out.push(String::new());
}

/// 组装 system + user 两条消息；history 只保留最近 history_turns 轮
pub fn build_messages(
    persona: &Persona,
    history: &[Exchange],
    question: &str,
    reference: &ReferenceMaterial,
    history_turns: usize,
    max_answer_chars: usize,
) -> Vec<Message> {
    let mut sections: Vec<String> = Vec::new();
    persona_section(persona, &mut sections);
    sections.extend(QUESTION_TYPE_RULES.iter().map(|s| s.to_string()));

    if let Some(samples) = &reference.sample_dialogue {
        sections.push("## 角色示例对话 (如有匹配请优先引用或改写，优先级最高)".to_string());
        sections.push(samples.clone());
        sections.push(String::new());
    }
    if let Some(kb) = &reference.knowledge_base {
        sections.push("## 参考知识库 (可结合使用)".to_string());
        sections.push(kb.clone());
        sections.push(String::new());
    }

    let recent = &history[history.len().saturating_sub(history_turns)..];
    if !recent.is_empty() {
        sections.push("## 对话历史（按时间顺序）".to_string());
        for (i, ex) in recent.iter().enumerate() {
            sections.push(format!("第{}轮:", i + 1));
            sections.push(format!("  AI提问: {}", ex.question));
            sections.push(format!("  学生回答: {}", ex.answer));
        }
        sections.push(String::new());
    }

    sections.push("## 当前问题".to_string());
    sections.push(question.to_string());
    sections.push(String::new());
    sections.extend(
        [
            "## 输出要求（按优先级执行）",
            "**优先级1**: 优先输出角色示例对话中的内容",
            "**优先级2**: 如果是开放式问题，再适度融入学生性格特点，但要注意：",
            "   - 性格特点应该自然体现，不要生硬套用",
            "   - 避免每次都使用相同的话术（如不要总说'这说不通'、'不知道'等）",
            "   - 保持回答的多样性和真实性，可以偶尔正常回答",
            "**优先级3**: 如果示例对话中有高度相关的回答，可以参考但需变化表达方式。",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    sections.push(format!(
        "**格式要求**: 仅返回学生回答内容，不要额外解释，控制在{max_answer_chars}字以内。"
    ));

    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(sections.join("\n")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaRegistry;

    #[test]
    fn test_prompt_sections_and_history_window() {
        let persona = PersonaRegistry::builtin().get("S4").unwrap();
        let history: Vec<Exchange> = (1..=12)
            .map(|i| Exchange {
                question: format!("问题{i}"),
                answer: format!("回答{i}"),
            })
            .collect();
        let reference = ReferenceMaterial {
            knowledge_base: Some("离心泵知识".into()),
            sample_dialogue: None,
        };
        let messages = build_messages(&persona, &history, "汽蚀是什么？", &reference, 10, 50);
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains("学生角色: S4 逻辑挑刺型学生"));
        assert!(user.contains("## 参考知识库"));
        assert!(!user.contains("## 角色示例对话"));
        assert!(!user.contains("问题2\n"));
        assert!(user.contains("AI提问: 问题3"));
        assert!(user.contains("## 当前问题\n汽蚀是什么？"));
        assert!(user.contains("控制在50字以内"));
    }
}
