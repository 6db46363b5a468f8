//! Produces the student-facing view of generated questions by dropping
//! answer and explanation blocks.

use regex::Regex;
use std::sync::LazyLock;

static START_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(?:正确?答案|参考答案|标准答案|答案解析|解析|解答|讲解|答案是|答案为|Answer|Explanation)\s*[:：】\])]?.*$",
        r"(?i)^\s*[（(【\[]?(?:答|解)\s*[：:]\s*.*$",
        r"(?i)^\s*[【\[]?(?:答案|解析|参考答案)[】\]]\s*.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("strip start regex is valid"))
    .collect()
});

static INLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(正确?答案|参考答案|标准答案|答案解析|解析|解答|答案是|答案为|Answer|Explanation)\s*[:：]?\s*")
        .expect("inline answer regex is valid")
});

static BOUNDARY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\s*(?:题目|选择题|判断题|简答题)\s*\d+",
        r"^\s*(?:选择题|判断题|简答题)\s*[：:]\s*$",
        r"^\s*\d+\s*[、\.\)．]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("boundary regex is valid"))
    .collect()
});

static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run regex is valid"));

fn is_start(line: &str) -> bool {
    START_RES.iter().any(|re| re.is_match(line)) || INLINE_RE.is_match(line)
}

fn is_boundary(line: &str) -> bool {
    BOUNDARY_RES.iter().any(|re| re.is_match(line))
}

/// Remove answer/explanation blocks, keeping question stems and options.
///
/// A block opens on a label line and swallows lines until the next question
/// marker. A line that is both a label and a marker (`"1. 答案：B"`) is treated
/// as a label, so the output never contains a line that would open a block and
/// a second pass changes nothing.
///
/// An option line that happens to contain an answer keyword (`"A. 以上解析均正确"`)
/// also opens a block.
pub fn strip_explanations(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_block = false;

    for line in text.lines() {
        if is_start(line) {
            in_block = true;
            continue;
        }
        if in_block {
            if is_boundary(line) {
                in_block = false;
                kept.push(line);
            }
            continue;
        }
        kept.push(line);
    }

    let joined = kept.join("\n");
    BLANK_RUN_RE
        .replace_all(&joined, "\n\n")
        .trim_matches('\n')
        .to_string()
}
