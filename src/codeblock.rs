//! First fenced code block in an assistant reply.
//!
//! Only the first block is ever returned; later blocks in the same reply are
//! ignored.

use regex::Regex;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```([A-Za-z0-9_+#.-]*)[ \t]*\r?\n([\s\S]*?)```").expect("fence regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
}

pub fn first_code_block(text: &str) -> Option<CodeBlock> {
    let caps = FENCE.captures(text)?;
    let language = caps
        .get(1)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let code = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    Some(CodeBlock {
        language,
        code: code.strip_suffix('\n').unwrap_or(code).to_string(),
    })
}
