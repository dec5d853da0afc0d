// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Judge response parsing.
//!
//! Model output is loosely structured: clean JSON, JSON wrapped in markdown
//! fences, truncated JSON, or prose. [`parse`] never fails; it degrades
//! through the tiers of [`ParseTier`] and always yields a score in
//! `[0, 10]` with a non-empty reason.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracejudge_core::ParseTier;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;
/// Substituted when no score can be found
pub const DEFAULT_SCORE: f64 = 5.0;

const NO_REASON: &str = "无评测理由";
const REASON_TRUNCATED: &str = "评测理由被截断";
const REASON_UNPARSEABLE: &str = "无法解析评测理由";
const MAX_FALLBACK_REASON_CHARS: usize = 200;

static SCORE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)"score"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#).expect("valid regex"));
static SCORE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:评分|score|分数)[:\s]*([0-9]+(?:\.[0-9]+)?)").expect("valid regex")
});
static SCORE_POINTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*分").expect("valid regex"));
static REASON_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(?:reason|reasoning)"\s*:\s*"([^"]*)"#).expect("valid regex")
});
static SCORE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)score\s*:\s*[0-9]+").expect("valid regex"));

/// Parsed judgement
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub score: f64,
    pub reason: String,
    pub tier: ParseTier,
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(MIN_SCORE, MAX_SCORE)
    } else {
        MIN_SCORE
    }
}

/// Parse raw judge output into a score and rationale
pub fn parse(raw: &str) -> Judgement {
    let cleaned = raw.trim();
    parse_json_object(cleaned).unwrap_or_else(|| parse_loose(cleaned))
}

/// Outermost `{...}` span parsed as a JSON object
fn parse_json_object(text: &str) -> Option<Judgement> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let object = parsed.as_object()?;

    let score = object.get("score").and_then(numeric).unwrap_or(0.0);
    let reason = object
        .get("reason")
        .and_then(reason_text)
        .or_else(|| object.get("reasoning").and_then(reason_text))
        .unwrap_or_else(|| NO_REASON.to_string());

    Some(Judgement {
        score: clamp_score(score),
        reason,
        tier: ParseTier::Exact,
    })
}

/// Number or numeric string; anything else counts as absent
fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Falsy values (`null`, `false`, `0`, `""`) count as absent
fn reason_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64().map_or(true, |f| f == 0.0) => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_loose(text: &str) -> Judgement {
    let found = SCORE_FIELD
        .captures(text)
        .or_else(|| SCORE_LABEL.captures(text))
        .or_else(|| SCORE_POINTS.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|n| n.is_finite());

    let (score, tier) = match found {
        Some(score) => (clamp_score(score), ParseTier::Approximate),
        None => (DEFAULT_SCORE, ParseTier::Defaulted),
    };

    Judgement {
        score,
        reason: loose_reason(text),
        tier,
    }
}

fn loose_reason(text: &str) -> String {
    if let Some(caps) = REASON_FIELD.captures(text) {
        let captured = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return if captured.is_empty() {
            REASON_TRUNCATED.to_string()
        } else {
            captured.to_string()
        };
    }

    let stripped: String = text.chars().filter(|c| !matches!(c, '{' | '}' | '"')).collect();
    let without_scores = SCORE_MENTION.replace_all(&stripped, "");
    let reason: String = without_scores
        .trim()
        .chars()
        .take(MAX_FALLBACK_REASON_CHARS)
        .collect();
    if reason.is_empty() {
        REASON_UNPARSEABLE.to_string()
    } else {
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clean_json() {
        let j = parse(r#"{"score": 8, "reason": "Accurate and complete answer"}"#);
        assert_eq!(j.score, 8.0);
        assert_eq!(j.reason, "Accurate and complete answer");
        assert_eq!(j.tier, ParseTier::Exact);
    }

    #[test]
    fn test_fenced_json_with_reasoning_key() {
        let raw = "```json\n{\"score\": \"7.5\", \"reasoning\": \"mostly relevant\"}\n```";
        let j = parse(raw);
        assert_eq!(j.score, 7.5);
        assert_eq!(j.reason, "mostly relevant");
        assert_eq!(j.tier, ParseTier::Exact);
    }

    #[test]
    fn test_json_score_is_clamped_and_non_numeric_is_zero() {
        assert_eq!(parse(r#"{"score": 15, "reason": "x"}"#).score, 10.0);
        assert_eq!(parse(r#"{"score": -3, "reason": "x"}"#).score, 0.0);
        let j = parse(r#"{"score": "great", "reason": ""}"#);
        assert_eq!(j.score, 0.0);
        assert_eq!(j.reason, NO_REASON);
    }

    #[test]
    fn test_falsy_reason_falls_through_to_reasoning() {
        let j = parse(r#"{"score": 4, "reason": 0, "reasoning": "too vague"}"#);
        assert_eq!(j.reason, "too vague");

        let j = parse(r#"{"score": 4, "reason": "", "reasoning": "off topic"}"#);
        assert_eq!(j.reason, "off topic");

        let j = parse(r#"{"score": 4, "reason": false, "reasoning": 0}"#);
        assert_eq!(j.reason, NO_REASON);

        let j = parse(r#"{"score": 4, "reason": 2}"#);
        assert_eq!(j.reason, "2");
    }

    #[test]
    fn test_truncated_json_recovers_score_and_reason() {
        let j = parse(r#"{"score": 9, "reason": "The answer covers every point but"#);
        assert_eq!(j.score, 9.0);
        assert_eq!(j.reason, "The answer covers every point but");
        assert_eq!(j.tier, ParseTier::Approximate);
    }

    #[test]
    fn test_truncated_right_after_reason_quote() {
        let j = parse(r#"{"score": 6, "reason": ""#);
        assert_eq!(j.score, 6.0);
        assert_eq!(j.reason, REASON_TRUNCATED);
    }

    #[test]
    fn test_natural_language_scores() {
        let j = parse("评分: 7，回答基本正确");
        assert_eq!(j.score, 7.0);
        assert_eq!(j.tier, ParseTier::Approximate);

        assert_eq!(parse("I would give this 6分 overall").score, 6.0);
        assert_eq!(parse("Score 4 because it rambles").score, 4.0);
    }

    #[test]
    fn test_nothing_usable_defaults() {
        let j = parse("The model refused to answer.");
        assert_eq!(j.score, DEFAULT_SCORE);
        assert_eq!(j.tier, ParseTier::Defaulted);
        assert_eq!(j.reason, "The model refused to answer.");

        let empty = parse("   ");
        assert_eq!(empty.score, DEFAULT_SCORE);
        assert_eq!(empty.reason, REASON_UNPARSEABLE);
    }

    #[test]
    fn test_fallback_reason_strips_structure_and_truncates() {
        let j = parse(&format!("{{score: 3 {}", "a".repeat(300)));
        assert_eq!(j.score, 3.0);
        assert!(!j.reason.contains('{'));
        assert!(!j.reason.to_lowercase().contains("score"));
        assert_eq!(j.reason.chars().count(), MAX_FALLBACK_REASON_CHARS);
    }

    proptest! {
        #[test]
        fn any_text_yields_bounded_score_and_reason(raw in "\\PC*") {
            let j = parse(&raw);
            prop_assert!(j.score >= MIN_SCORE && j.score <= MAX_SCORE);
            prop_assert!(!j.reason.is_empty());
        }

        #[test]
        fn any_json_score_is_clamped(score in proptest::num::f64::ANY) {
            let raw = serde_json::json!({"score": score, "reason": "r"}).to_string();
            let j = parse(&raw);
            prop_assert!(j.score >= MIN_SCORE && j.score <= MAX_SCORE);
        }
    }
}
