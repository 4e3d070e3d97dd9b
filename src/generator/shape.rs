//! 问题类型识别与回答整形
//!
//! 封闭式问题（确认式 / 选择式）只需要最短的有效回答，开放式问题按字数截断。

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionKind {
    /// 是/否式确认；yes_no 表示题目明确要求回复「是或否」
    Confirmation { yes_no: bool },
    /// 给出了枚举选项
    Choice(Vec<String>),
    Open,
}

/// 确认式回答的有效取值
pub const CONFIRMATION_TOKENS: &[&str] = &["是", "否", "好的", "确认"];

/// 明确要求确认的措辞，出现在追问段任意位置即可
const CONFIRMATION_MARKERS: &[&str] = &[
    "是或否",
    "请回复是",
    "回复是",
    "请确认",
    "确认的话",
    "是否确认",
];

/// 句末追问式确认，必须紧挨着问号
const CONFIRMATION_TAILS: &[&str] = &[
    "准备好了吗",
    "可以开始了吗",
    "确认吗",
    "是不是",
    "对吗",
    "好吗",
    "可以吗",
    "明白了吗",
    "清楚了吗",
];

/// 出现这些疑问词时按开放式处理
const OPEN_INTERROGATIVES: &[&str] = &["什么", "为什么", "怎么", "如何", "哪", "多少", "原因"];

const SENTENCE_ENDS: &[char] = &['。', '！', '!', '？', '?', '；', ';', '\n'];

/// 最后一个问句及其后的全部文字；没有问句时取最后一句
///
/// AI 发言常是「点评 + 追问」，只有追问段决定回答形式。
fn question_focus(question: &str) -> &str {
    let text = question.trim();
    let mut starts = vec![0];
    let mut last_question: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if SENTENCE_ENDS.contains(&c) {
            if c == '?' || c == '？' {
                last_question = starts.last().copied();
            }
            starts.push(i + c.len_utf8());
        }
    }
    let start = match last_question {
        Some(start) => start,
        None => starts
            .iter()
            .rev()
            .copied()
            .find(|&s| !text[s..].trim().is_empty())
            .unwrap_or(0),
    };
    text[start..].trim()
}

fn has_confirmation_tail(focus: &str) -> bool {
    focus
        .split(['?', '？'])
        .map(|s| s.trim_end())
        .any(|s| CONFIRMATION_TAILS.iter().any(|tail| s.ends_with(tail)))
}

const ROLE_PREFIXES: &[&str] = &["你是", "您是", "是", "选择", "选"];

/// 独立出现的大写字母 A-F（前后都不是英文字母）
fn letter_options(question: &str) -> Vec<String> {
    let chars: Vec<char> = question.chars().collect();
    let mut letters: Vec<String> = Vec::new();
    for (i, c) in chars.iter().enumerate() {
        if !('A'..='F').contains(c) {
            continue;
        }
        let isolated_before = i == 0 || !chars[i - 1].is_ascii_alphabetic();
        let isolated_after = chars.get(i + 1).map_or(true, |n| !n.is_ascii_alphabetic());
        let l = c.to_string();
        if isolated_before && isolated_after && !letters.contains(&l) {
            letters.push(l);
        }
    }
    letters
}

fn number_option_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([1-9])\s*[/、或,，]\s*([1-9])(?:\s*[/、或,，]\s*([1-9]))*")
            .expect("valid regex")
    })
}

fn either_or_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\p{Han}{1,4}?)还是(\p{Han}{1,4})").expect("valid regex"))
}

fn speaker_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:学生回答|学生|回答|答|我的回答)\s*[:：]\s*").expect("valid regex")
    })
}

fn choice_options(question: &str) -> Vec<String> {
    let letters = letter_options(question);
    if letters.len() >= 2 {
        return letters;
    }

    if question.contains('选') {
        if let Some(m) = number_option_re().find(question) {
            let mut numbers: Vec<String> = Vec::new();
            for c in m.as_str().chars().filter(|c| c.is_ascii_digit()) {
                let n = c.to_string();
                if !numbers.contains(&n) {
                    numbers.push(n);
                }
            }
            if numbers.len() >= 2 {
                return numbers;
            }
        }
    }

    if let Some(caps) = either_or_re().captures(question) {
        let mut left = caps[1].to_string();
        for prefix in ROLE_PREFIXES {
            if let Some(rest) = left.strip_prefix(prefix) {
                if !rest.is_empty() {
                    left = rest.to_string();
                    break;
                }
            }
        }
        return vec![left, caps[2].to_string()];
    }
    Vec::new()
}

/// 识别问题类型；只看最后的追问段，选择式优先于确认式
pub fn classify(question: &str) -> QuestionKind {
    let focus = question_focus(question);
    let options = choice_options(focus);
    if options.len() >= 2 {
        return QuestionKind::Choice(options);
    }

    let explicit = CONFIRMATION_MARKERS.iter().any(|m| focus.contains(m));
    let open = OPEN_INTERROGATIVES.iter().any(|w| focus.contains(w));
    let asks_whether = focus.contains("是否") && (focus.ends_with('?') || focus.ends_with('？'));
    if explicit || (!open && (asks_whether || has_confirmation_tail(focus))) {
        let yes_no = focus.contains("是或否") || focus.contains("是否");
        return QuestionKind::Confirmation { yes_no };
    }
    QuestionKind::Open
}

/// 去掉说话人前缀与外层引号
pub fn strip_decorations(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    loop {
        let before = text.clone();
        text = speaker_prefix_re().replace(&text, "").trim().to_string();
        for (open, close) in [('“', '”'), ('"', '"'), ('「', '」'), ('『', '』'), ('\'', '\'')] {
            if text.starts_with(open) && text.ends_with(close) && text.chars().count() >= 2 {
                let inner: String = text
                    .chars()
                    .skip(1)
                    .take(text.chars().count() - 2)
                    .collect();
                text = inner.trim().to_string();
            }
        }
        if text == before {
            return text;
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

fn confirmation_token(answer: &str, yes_no: bool) -> &'static str {
    let negative = ["否", "不", "没", "还没"].iter().any(|p| answer.starts_with(p));
    if negative {
        "否"
    } else if yes_no {
        "是"
    } else if answer.contains("确认") {
        "确认"
    } else if answer.contains('好') {
        "好的"
    } else {
        "是"
    }
}

/// 按问题类型整形 LLM 输出
pub fn shape_answer(raw: &str, kind: &QuestionKind, max_chars: usize) -> String {
    let cleaned = strip_decorations(raw);
    match kind {
        QuestionKind::Confirmation { yes_no } => confirmation_token(&cleaned, *yes_no).to_string(),
        QuestionKind::Choice(options) => {
            let upper = cleaned.to_uppercase();
            options
                .iter()
                .filter_map(|opt| upper.find(&opt.to_uppercase()).map(|pos| (pos, opt)))
                .min_by_key(|(pos, _)| *pos)
                .map(|(_, opt)| opt.clone())
                .unwrap_or_else(|| truncate_chars(&cleaned, max_chars))
        }
        QuestionKind::Open => truncate_chars(&cleaned, max_chars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_confirmation() {
        assert_eq!(classify("是否确认？"), QuestionKind::Confirmation { yes_no: true });
        assert_eq!(
            classify("你准备好了吗？请回复是或否"),
            QuestionKind::Confirmation { yes_no: true }
        );
        assert_eq!(classify("确认的话请回复"), QuestionKind::Confirmation { yes_no: false });
    }

    #[test]
    fn test_classify_choice() {
        assert_eq!(
            classify("你选择A还是B？"),
            QuestionKind::Choice(vec!["A".into(), "B".into()])
        );
        assert_eq!(
            classify("请从 A/B/C 中选一个"),
            QuestionKind::Choice(vec!["A".into(), "B".into(), "C".into()])
        );
        assert_eq!(
            classify("请选择1/2/3"),
            QuestionKind::Choice(vec!["1".into(), "2".into(), "3".into()])
        );
        assert_eq!(
            classify("你是学生还是老师？"),
            QuestionKind::Choice(vec!["学生".into(), "老师".into()])
        );
    }

    #[test]
    fn test_classify_open() {
        assert_eq!(classify("汽蚀现象是什么原因造成的？"), QuestionKind::Open);
    }

    #[test]
    fn test_classify_uses_final_question_only() {
        let question = "很好，你已经确认了进口阀门的状态。那么汽蚀现象是什么原因造成的？";
        assert_eq!(classify(question), QuestionKind::Open);
        let answer = shape_answer("进口压力低于饱和蒸汽压，液体汽化", &classify(question), 50);
        assert_eq!(answer, "进口压力低于饱和蒸汽压，液体汽化");

        assert_eq!(
            classify("参数已经核对完毕。可以开始了吗？"),
            QuestionKind::Confirmation { yes_no: false }
        );
        assert_eq!(
            classify("上一步你选了A。接下来汽蚀余量怎么计算？"),
            QuestionKind::Open
        );
    }

    #[test]
    fn test_open_question_with_tail_word_stays_open() {
        assert_eq!(classify("这台泵为什么会振动，是不是"), QuestionKind::Open);
        assert_eq!(classify("泵是否发生了汽蚀，原因是什么？"), QuestionKind::Open);
    }

    #[test]
    fn test_confirmation_collapses_to_token() {
        let kind = classify("是否确认？");
        for raw in [
            "是的，我已经确认过所有参数了，可以开始",
            "学生：“嗯……好吧，我确认一下”",
            "不，我还想再看看",
        ] {
            let out = shape_answer(raw, &kind, 50);
            assert!(CONFIRMATION_TOKENS.contains(&out.as_str()), "got {out}");
        }
        assert_eq!(shape_answer("不，我还想再看看", &kind, 50), "否");
    }

    #[test]
    fn test_choice_picks_first_mentioned_option() {
        let kind = classify("你选择A还是B？");
        assert_eq!(shape_answer("我选b，因为更稳妥", &kind, 50), "B");
        let kind = classify("你是学生还是老师？");
        assert_eq!(shape_answer("我当然是学生啦", &kind, 50), "学生");
    }

    #[test]
    fn test_open_answer_is_truncated_and_stripped() {
        let raw = format!("回答：“{}”", "很".repeat(80));
        let out = shape_answer(&raw, &QuestionKind::Open, 50);
        assert_eq!(out.chars().count(), 50);
        assert!(out.chars().all(|c| c == '很'));
    }
}
