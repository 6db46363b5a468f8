//! Keyword and regex reading of a free-text question-generation request.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Difficulty, ParsedIntent, QuestionKind, QuestionType};

static TYPE_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*(?:道|题|个)[^\x{4e00}-\x{9fa5}]*?(选择题|判断题|简答题|材料\s*分析题?)")
        .expect("type count regex is valid")
});

static LOOSE_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:道|题|个)").expect("loose count regex is valid"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

static ABOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"关于(.*?)的").expect("about regex is valid"));

static ABOUT_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(简单|容易|基础|中等|困难|高级|选择题|判断题|简答题|材料\s*分析题?|题目|\s)")
        .expect("about noise regex is valid")
});

static FALLBACK_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d+道|\d+题|请|给我|出|关于|的|简单|中等|困难|选择题|判断题|简答题|材料\s*分析题?|题目",
    )
    .expect("fallback noise regex is valid")
});

/// Keyword sets the parser consults. Swap the table to retune a locale or course.
#[derive(Debug, Clone)]
pub struct IntentKeywords {
    pub easy: Vec<String>,
    pub hard: Vec<String>,
    /// Substrings that mark each question kind, checked in this order
    pub type_markers: Vec<(QuestionKind, Vec<String>)>,
    /// Question count when the request names none
    pub default_count: u32,
}

impl Default for IntentKeywords {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            easy: words(&["简单", "容易", "基础"]),
            hard: words(&["困难", "难", "高级"]),
            type_markers: vec![
                (QuestionKind::Choice, words(&["选择题"])),
                (QuestionKind::TrueFalse, words(&["判断题"])),
                (QuestionKind::ShortAnswer, words(&["简答题", "材料分析"])),
            ],
            default_count: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntentParser {
    keywords: IntentKeywords,
}

impl IntentParser {
    pub fn new(keywords: IntentKeywords) -> Self {
        Self { keywords }
    }

    pub fn parse(&self, input: &str, known_topics: &[&str], default_topic: &str) -> ParsedIntent {
        let mut type_counts = explicit_type_counts(input);

        let requested = if type_counts.is_empty() {
            let numbers: Vec<u32> = LOOSE_COUNT_RE
                .captures_iter(input)
                .filter_map(|caps| caps[1].parse::<u32>().ok())
                .collect();
            if numbers.is_empty() {
                self.keywords.default_count
            } else {
                numbers.into_iter().fold(0u32, u32::saturating_add)
            }
        } else {
            type_counts.iter().fold(0u32, |acc, (_, n)| acc.saturating_add(*n))
        };
        let mut num_questions = requested.max(1);

        let difficulty = self.difficulty(input);

        let detected = self.detected_kinds(input);
        if type_counts.is_empty() && !detected.is_empty() {
            type_counts = split_evenly(num_questions, &detected);
            num_questions = type_counts.iter().map(|(_, n)| *n).sum();
        }

        let question_type = match type_counts.len() {
            0 => {
                type_counts.push((QuestionKind::Choice, num_questions));
                QuestionType::Single(QuestionKind::Choice)
            }
            1 => QuestionType::Single(type_counts[0].0),
            _ => QuestionType::Mixed,
        };

        ParsedIntent {
            topics: extract_topics(input, known_topics, default_topic),
            num_questions,
            difficulty,
            question_type,
            type_counts,
        }
    }

    fn difficulty(&self, input: &str) -> Difficulty {
        let any = |words: &[String]| words.iter().any(|w| input.contains(w.as_str()));
        if any(&self.keywords.easy) {
            Difficulty::Easy
        } else if any(&self.keywords.hard) {
            Difficulty::Hard
        } else {
            Difficulty::Medium
        }
    }

    fn detected_kinds(&self, input: &str) -> Vec<QuestionKind> {
        let mut kinds = Vec::new();
        for (kind, markers) in &self.keywords.type_markers {
            if markers.iter().any(|m| input.contains(m.as_str())) && !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }
}

/// Parse with the built-in keyword table.
pub fn parse_intent(input: &str, known_topics: &[&str], default_topic: &str) -> ParsedIntent {
    IntentParser::default().parse(input, known_topics, default_topic)
}

fn explicit_type_counts(input: &str) -> Vec<(QuestionKind, u32)> {
    let compact = WHITESPACE_RE.replace_all(input, "");
    let mut counts: Vec<(QuestionKind, u32)> = Vec::new();

    for caps in TYPE_COUNT_RE.captures_iter(&compact) {
        let Ok(n) = caps[1].parse::<u32>() else {
            continue;
        };
        if n == 0 {
            continue;
        }
        let Some(kind) = QuestionKind::from_label(&caps[2]) else {
            continue;
        };
        match counts.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, total)) => *total = total.saturating_add(n),
            None => counts.push((kind, n)),
        }
    }
    counts
}

/// At least one question per kind; leftovers go to the earliest kinds.
fn split_evenly(total: u32, kinds: &[QuestionKind]) -> Vec<(QuestionKind, u32)> {
    let len = kinds.len() as u32;
    let per = (total / len).max(1);
    let mut remainder = total.saturating_sub(per * len);
    kinds
        .iter()
        .map(|kind| {
            let extra = if remainder > 0 {
                remainder -= 1;
                1
            } else {
                0
            };
            (*kind, per + extra)
        })
        .collect()
}

fn extract_topics(input: &str, known_topics: &[&str], default_topic: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    let mut push = |topic: String| {
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    };

    for topic in known_topics.iter().filter(|t| input.contains(**t)) {
        push(topic.to_string());
    }
    for caps in ABOUT_RE.captures_iter(input) {
        let cleaned = ABOUT_NOISE_RE.replace_all(&caps[1], "");
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            push(cleaned.to_string());
        }
    }

    if topics.is_empty() {
        let remainder = FALLBACK_NOISE_RE.replace_all(input, "");
        let remainder = remainder.trim();
        topics.push(if remainder.is_empty() {
            default_topic.to_string()
        } else {
            remainder.to_string()
        });
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    const JINDAISHI: &[&str] = &["鸦片战争", "太平天国运动", "洋务运动", "戊戌变法", "辛亥革命"];

    fn parse(input: &str) -> ParsedIntent {
        parse_intent(input, JINDAISHI, "中国近现代史纲要")
    }

    #[test]
    fn simple_choice_request() {
        let intent = parse("请出3道关于戊戌变法的简单选择题");
        assert_eq!(intent.topics, vec!["戊戌变法"]);
        assert_eq!(intent.num_questions, 3);
        assert_eq!(intent.difficulty, Difficulty::Easy);
        assert_eq!(intent.question_type, QuestionType::Single(QuestionKind::Choice));
        assert_eq!(intent.type_counts, vec![(QuestionKind::Choice, 3)]);
    }

    #[test]
    fn explicit_counts_make_mixed_request() {
        let intent = parse("出2道选择题和3道判断题，再来1道材料分析题");
        assert_eq!(intent.num_questions, 6);
        assert_eq!(intent.question_type, QuestionType::Mixed);
        assert_eq!(
            intent.type_counts,
            vec![
                (QuestionKind::Choice, 2),
                (QuestionKind::TrueFalse, 3),
                (QuestionKind::ShortAnswer, 1),
            ]
        );
    }

    #[test]
    fn repeated_type_counts_accumulate() {
        let intent = parse("先出 2 道 选择题，然后再出 3 道选择题");
        assert_eq!(intent.type_counts, vec![(QuestionKind::Choice, 5)]);
        assert_eq!(intent.question_type, QuestionType::Single(QuestionKind::Choice));
        assert_eq!(intent.num_questions, 5);
    }

    #[test]
    fn counts_always_sum_to_total() {
        let inputs = [
            "出2道选择题和3道判断题",
            "出5道题，包括选择题和判断题",
            "出1道题，选择题判断题简答题都要",
            "来10个简答题",
            "给我一些练习",
            "出7道选择题和判断题",
            "0道选择题",
        ];
        for input in inputs {
            let intent = parse(input);
            let sum: u32 = intent.type_counts.iter().map(|(_, n)| n).sum();
            assert_eq!(sum, intent.num_questions, "input: {input}");
            assert!(intent.num_questions >= 1, "input: {input}");
            let distinct = intent.type_counts.len();
            assert_eq!(
                intent.question_type == QuestionType::Mixed,
                distinct > 1,
                "input: {input}"
            );
        }
    }

    #[test]
    fn detected_types_share_the_total() {
        let intent = parse("出5道题，包括选择题和判断题");
        assert_eq!(intent.num_questions, 5);
        assert_eq!(
            intent.type_counts,
            vec![(QuestionKind::Choice, 3), (QuestionKind::TrueFalse, 2)]
        );

        // fewer questions than kinds still yields one of each
        let intent = parse("出1道题，选择题判断题简答题都要");
        assert_eq!(intent.num_questions, 3);
        assert_eq!(intent.question_type, QuestionType::Mixed);
    }

    #[test]
    fn defaults_without_counts_or_types() {
        let intent = parse("关于洋务运动的题目");
        assert_eq!(intent.num_questions, 5);
        assert_eq!(intent.type_counts, vec![(QuestionKind::Choice, 5)]);
        assert_eq!(intent.difficulty, Difficulty::Medium);
        assert_eq!(intent.topics, vec!["洋务运动"]);
    }

    #[test]
    fn easy_words_win_over_hard_words() {
        assert_eq!(parse("出3道困难的选择题").difficulty, Difficulty::Hard);
        assert_eq!(parse("出几道高级题").difficulty, Difficulty::Hard);
        assert_eq!(parse("基础但有点难的题").difficulty, Difficulty::Easy);
        assert_eq!(parse("出3道简单选择题").difficulty, Difficulty::Easy);
    }

    #[test]
    fn known_topic_and_about_phrase_do_not_duplicate() {
        let intent = parse("关于鸦片战争的选择题");
        assert_eq!(intent.topics, vec!["鸦片战争"]);
    }

    #[test]
    fn every_about_phrase_contributes() {
        let intent = parse("出关于辛亥革命的题和关于五四运动的简单题");
        assert_eq!(intent.topics, vec!["辛亥革命", "五四运动"]);
        assert_eq!(intent.topic_line(), "辛亥革命; 五四运动");
    }

    #[test]
    fn fallback_topic_from_stripped_input() {
        let intent = parse("请出5道工业革命选择题");
        assert_eq!(intent.topics, vec!["工业革命"]);

        let intent = parse("请出5道选择题");
        assert_eq!(intent.topics, vec!["中国近现代史纲要"]);
    }

    #[test]
    fn custom_keyword_table() {
        let mut keywords = IntentKeywords::default();
        keywords.easy = vec!["入门".into()];
        keywords.default_count = 2;
        let parser = IntentParser::new(keywords);
        let intent = parser.parse("入门练习", &[], "默认");
        assert_eq!(intent.difficulty, Difficulty::Easy);
        assert_eq!(intent.num_questions, 2);
        assert_eq!(intent.topics, vec!["入门练习"]);
    }
}
