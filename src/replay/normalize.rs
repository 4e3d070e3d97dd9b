//! 问题文本规范化

/// 去掉首尾空白，内部连续空白压成一个空格
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

const TERMINATORS: &[char] = &['。', '！', '!', '？', '?', '；', ';', '\n'];
const CLOSERS: &[char] = &['”', '"', '’', '\'', '」', '』', '）', ')'];

/// 取最后一个以问号（? 或 ？）结尾的句子；没有问句时返回整段（已压缩空白）
///
/// AI 发言常是「点评 + 追问」，语义匹配只看追问部分。
pub fn extract_final_question(text: &str) -> String {
    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if TERMINATORS.contains(&c) {
            while let Some(&next) = chars.peek() {
                if !CLOSERS.contains(&next) {
                    break;
                }
                current.push(next);
                chars.next();
            }
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current);
    }

    sentences
        .iter()
        .rev()
        .map(|s| s.trim().trim_end_matches(CLOSERS).trim_end())
        .find(|s| s.ends_with('?') || s.ends_with('？'))
        .map(collapse_whitespace)
        .unwrap_or_else(|| collapse_whitespace(text))
}
