use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::config::PARSE_EXCERPT_CHARS;

/// No salvage strategy produced usable JSON.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unparseable model output: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    /// Leading excerpt of the raw response for diagnostics.
    pub excerpt: String,
}

impl ParseFailure {
    pub fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: excerpt(raw, PARSE_EXCERPT_CHARS),
        }
    }
}

/// Ways of digging a JSON value out of a model response, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The whole response is JSON.
    Direct,
    /// A ```json (or bare ```) fenced block.
    FencedBlock,
    /// First `{` through last `}`.
    BraceScan,
    /// First `[` through last `]`.
    BracketScan,
    /// Strip chat prefixes/suffixes and trailing commas, then parse.
    AffixTrim,
}

impl ParseStrategy {
    pub const ORDER: [ParseStrategy; 5] = [
        Self::Direct,
        Self::FencedBlock,
        Self::BraceScan,
        Self::BracketScan,
        Self::AffixTrim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::FencedBlock => "fenced_block",
            Self::BraceScan => "brace_scan",
            Self::BracketScan => "bracket_scan",
            Self::AffixTrim => "affix_trim",
        }
    }

    fn apply(&self, response: &str) -> Option<Value> {
        match self {
            Self::Direct => parse_json(response),
            Self::FencedBlock => fenced_blocks(response).into_iter().find_map(parse_json),
            Self::BraceScan => span_between(response, '{', '}').and_then(parse_json),
            Self::BracketScan => span_between(response, '[', ']').and_then(parse_json),
            Self::AffixTrim => parse_json(&trim_affixes(response)),
        }
    }
}

static LEADING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(?:```(?:json)?|json\s*:?|output\s*:|response\s*:|answer\s*:|here is the json\s*:?|here's the json\s*:?)\s*")
        .expect("valid regex")
});

static TRAILING_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\s*(?:```|</s>|<\|im_end\|>|<\|eot_id\|>)\s*$").expect("valid regex")
});

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

/// Tries every strategy in order and reports which one succeeded.
pub fn salvage_json(response: &str) -> Result<(Value, ParseStrategy), ParseFailure> {
    if response.trim().is_empty() {
        return Err(ParseFailure::new("empty response", response));
    }
    for strategy in ParseStrategy::ORDER {
        if let Some(value) = strategy.apply(response) {
            if strategy != ParseStrategy::Direct {
                tracing::debug!(strategy = strategy.as_str(), "Salvaged JSON from model output");
            }
            return Ok((value, strategy));
        }
    }
    Err(ParseFailure::new("no JSON object or array found", response))
}

/// First `max_chars` characters, on a char boundary.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn parse_json(candidate: &str) -> Option<Value> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn fenced_blocks(response: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = response;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let info = &after_fence[..body_start];
        // Accept ```json and bare ``` fences; skip other languages.
        let lang = info.trim();
        let body = &after_fence[body_start..];
        let Some(end) = body.find("```") else {
            break;
        };
        if lang.is_empty() || lang.eq_ignore_ascii_case("json") {
            blocks.push(&body[..end]);
        }
        rest = &body[end + 3..];
    }
    blocks
}

fn span_between(response: &str, open: char, close: char) -> Option<&str> {
    let start = response.find(open)?;
    let end = response.rfind(close)?;
    (end > start).then(|| &response[start..=end])
}

fn trim_affixes(response: &str) -> String {
    let without_prefix = LEADING_LABEL.replace(response, "");
    let without_suffix = TRAILING_NOISE.replace(&without_prefix, "");
    TRAILING_COMMA.replace_all(&without_suffix, "$1").into_owned()
}
