use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

use super::InterpretError;

/// Control tokens some chat models leak into their output.
pub const DEFAULT_SENTINEL_TOKENS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|eot_id|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<|assistant|>",
    "<|end|>",
    "[INST]",
    "[/INST]",
    "<s>",
    "</s>",
];

const MAX_CANDIDATES: usize = 8;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap());
static UNQUOTED_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_\p{L}][\w-]*(?:[ \t]+[\w-]+)*)\s*:").unwrap()
});
static BARE_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r":([ \t]*)([A-Za-z_\p{L}][^,}\]\n]*?|-?\d+(?:[.,]\d+)?\s*/\s*\d+(?:[.,]\d+)?)([ \t]*(?:[,}\]\n]|$))",
    )
    .unwrap()
});
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());
static JS_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(undefined|NaN|None|True|False)\b").unwrap());

/// A single text rewrite applied to a JSON candidate before parsing.
pub trait RepairRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, input: &str) -> String;
}

pub struct StripSentinelTokens {
    tokens: Vec<String>,
}

impl StripSentinelTokens {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }
}

impl RepairRule for StripSentinelTokens {
    fn name(&self) -> &str {
        "strip_sentinel_tokens"
    }

    fn apply(&self, input: &str) -> String {
        self.tokens
            .iter()
            .filter(|t| !t.is_empty())
            .fold(input.to_string(), |text, token| text.replace(token.as_str(), ""))
    }
}

pub struct TypographicQuotes;

impl RepairRule for TypographicQuotes {
    fn name(&self) -> &str {
        "typographic_quotes"
    }

    fn apply(&self, input: &str) -> String {
        input
            .chars()
            .map(|c| match c {
                '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
                '\u{2018}' | '\u{2019}' => '\'',
                other => other,
            })
            .collect()
    }
}

/// Rewrites `'...'` strings as JSON strings. A quote only opens a string
/// where a JSON value or key may start, and only closes one before a
/// delimiter, so apostrophes inside words stay literal.
pub struct SingleQuotedStrings;

impl RepairRule for SingleQuotedStrings {
    fn name(&self) -> &str {
        "single_quoted_strings"
    }

    fn apply(&self, input: &str) -> String {
        let chars: Vec<char> = input.chars().collect();
        let mut out = String::with_capacity(input.len());
        let mut in_double = false;
        let mut escaped = false;
        let mut last_token = None;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            i += 1;

            if in_double {
                out.push(ch);
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_double = false;
                    last_token = Some('"');
                }
                continue;
            }

            match ch {
                '"' => {
                    in_double = true;
                    out.push(ch);
                }
                '\'' if opens_string(last_token) => {
                    out.push('"');
                    let mut inner_escape = false;
                    while i < chars.len() {
                        let c = chars[i];
                        i += 1;
                        if inner_escape {
                            if c != '\'' {
                                out.push('\\');
                            }
                            out.push(c);
                            inner_escape = false;
                            continue;
                        }
                        match c {
                            '\\' => inner_escape = true,
                            '\'' if closes_string(&chars[i..]) => break,
                            '"' => out.push_str("\\\""),
                            _ => out.push(c),
                        }
                    }
                    out.push('"');
                    last_token = Some('"');
                }
                _ => {
                    out.push(ch);
                    if !ch.is_whitespace() {
                        last_token = Some(ch);
                    }
                }
            }
        }

        out
    }
}

fn opens_string(previous: Option<char>) -> bool {
    matches!(previous, None | Some('{' | '[' | ':' | ','))
}

fn closes_string(rest: &[char]) -> bool {
    matches!(
        rest.iter().find(|c| !c.is_whitespace()),
        None | Some(',' | '}' | ']' | ':')
    )
}

pub struct NonJsonLiterals;

impl RepairRule for NonJsonLiterals {
    fn name(&self) -> &str {
        "non_json_literals"
    }

    fn apply(&self, input: &str) -> String {
        map_outside_strings(input, |segment| {
            JS_LITERAL
                .replace_all(segment, |caps: &Captures| match &caps[1] {
                    "True" => "true",
                    "False" => "false",
                    _ => "null",
                })
                .into_owned()
        })
    }
}

pub struct QuoteObjectKeys;

impl RepairRule for QuoteObjectKeys {
    fn name(&self) -> &str {
        "quote_object_keys"
    }

    fn apply(&self, input: &str) -> String {
        map_outside_strings(input, |segment| {
            UNQUOTED_KEY.replace_all(segment, "${1}\"${2}\":").into_owned()
        })
    }
}

pub struct QuoteBareValues;

impl RepairRule for QuoteBareValues {
    fn name(&self) -> &str {
        "quote_bare_values"
    }

    fn apply(&self, input: &str) -> String {
        map_outside_strings(input, |segment| {
            BARE_VALUE
                .replace_all(segment, |caps: &Captures| {
                    let value = caps[2].trim_end();
                    if matches!(value, "true" | "false" | "null") {
                        return caps[0].to_string();
                    }
                    format!(
                        ":{}\"{}\"{}",
                        &caps[1],
                        value.replace('\\', "\\\\"),
                        &caps[3]
                    )
                })
                .into_owned()
        })
    }
}

pub struct TrailingCommas;

impl RepairRule for TrailingCommas {
    fn name(&self) -> &str {
        "trailing_commas"
    }

    fn apply(&self, input: &str) -> String {
        map_outside_strings(input, |segment| {
            TRAILING_COMMA.replace_all(segment, "$1").into_owned()
        })
    }
}

/// Closes strings, arrays and objects left open by a truncated reply.
pub struct CloseUnbalanced;

impl RepairRule for CloseUnbalanced {
    fn name(&self) -> &str {
        "close_unbalanced"
    }

    fn apply(&self, input: &str) -> String {
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for ch in input.chars() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }
            match ch {
                '"' => in_string = true,
                '{' => stack.push('}'),
                '[' => stack.push(']'),
                '}' | ']' => {
                    if stack.last() == Some(&ch) {
                        stack.pop();
                    }
                }
                _ => {}
            }
        }

        if stack.is_empty() && !in_string {
            return input.to_string();
        }

        let mut out = input.to_string();
        if in_string {
            out.push('"');
        }
        let trimmed_len = out.trim_end().trim_end_matches(',').len();
        out.truncate(trimmed_len);
        while let Some(closer) = stack.pop() {
            out.push(closer);
        }
        out
    }
}

/// Ordered list of repair rules. Each rule is independent; order matters
/// only in that earlier rules normalize quoting for later ones.
pub struct RepairPipeline {
    rules: Vec<Box<dyn RepairRule>>,
}

impl RepairPipeline {
    pub fn new(rules: Vec<Box<dyn RepairRule>>) -> Self {
        Self { rules }
    }

    pub fn with_sentinel_tokens(tokens: Vec<String>) -> Self {
        Self::new(vec![
            Box::new(StripSentinelTokens::new(tokens)),
            Box::new(TypographicQuotes),
            Box::new(SingleQuotedStrings),
            Box::new(NonJsonLiterals),
            Box::new(QuoteObjectKeys),
            Box::new(QuoteBareValues),
            Box::new(TrailingCommas),
            Box::new(CloseUnbalanced),
        ])
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn repair(&self, input: &str) -> String {
        self.rules.iter().fold(input.to_string(), |text, rule| {
            let repaired = rule.apply(&text);
            if repaired != text {
                debug!("JSON repair rule {} rewrote candidate", rule.name());
            }
            repaired
        })
    }

    /// Parses `candidate` as a JSON object, retrying once after repair.
    pub fn parse_object(&self, candidate: &str) -> Result<Map<String, Value>, InterpretError> {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Ok(map);
        }
        match serde_json::from_str::<Value>(&self.repair(candidate))? {
            Value::Object(map) => Ok(map),
            _ => Err(InterpretError::NotAnObject),
        }
    }
}

impl Default for RepairPipeline {
    fn default() -> Self {
        Self::with_sentinel_tokens(
            DEFAULT_SENTINEL_TOKENS.iter().map(|t| t.to_string()).collect(),
        )
    }
}

/// Possible JSON objects in a reply: fenced code blocks first, then
/// brace-balanced spans of the whole text. An object that never closes
/// runs to the end of the text.
pub fn json_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = Vec::new();

    for caps in FENCED_BLOCK.captures_iter(raw) {
        if let Some(body) = caps.get(1) {
            let body = body.as_str().trim();
            if body.contains('{') {
                candidates.extend(balanced_objects(body));
            }
        }
    }
    for span in balanced_objects(raw) {
        if !candidates.contains(&span) {
            candidates.push(span);
        }
    }

    candidates.truncate(MAX_CANDIDATES);
    candidates
}

fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let bytes = text.as_bytes();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                let span = &text[start..end];
                if span.contains(':') {
                    spans.push(span);
                }
                pos = end;
            }
            None => {
                spans.push(&text[start..]);
                break;
            }
        }
    }

    spans
}

/// Applies `f` to every stretch of `input` that lies outside a
/// double-quoted string, copying string literals through untouched.
pub fn map_outside_strings<F>(input: &str, f: F) -> String
where
    F: Fn(&str) -> String,
{
    let mut out = String::with_capacity(input.len());
    let mut segment_start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
                out.push_str(&input[segment_start..=idx]);
                segment_start = idx + 1;
            }
        } else if ch == '"' {
            out.push_str(&f(&input[segment_start..idx]));
            in_string = true;
            segment_start = idx;
        }
    }

    if in_string {
        out.push_str(&input[segment_start..]);
    } else {
        out.push_str(&f(&input[segment_start..]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_configured_sentinels() {
        let rule = StripSentinelTokens::new(vec!["<|im_end|>".into(), "<<END>>".into()]);
        assert_eq!(rule.apply("{\"a\": 1}<|im_end|><<END>>"), "{\"a\": 1}");
    }

    #[test]
    fn converts_single_quoted_strings() {
        let out = SingleQuotedStrings.apply("{'nota': 8, 'comentario': 'diz \"ok\"', \"x\": \"it's\"}");
        assert_eq!(
            out,
            "{\"nota\": 8, \"comentario\": \"diz \\\"ok\\\"\", \"x\": \"it's\"}"
        );
    }

    #[test]
    fn apostrophes_inside_words_stay_literal() {
        assert_eq!(
            SingleQuotedStrings.apply("{comentario: it's readable, nota: 8}"),
            "{comentario: it's readable, nota: 8}"
        );
        assert_eq!(
            SingleQuotedStrings.apply("{'comentario': 'it's fine', 'nota': 7}"),
            "{\"comentario\": \"it's fine\", \"nota\": 7}"
        );
    }

    #[test]
    fn quotes_unquoted_keys_outside_strings() {
        let out = QuoteObjectKeys.apply("{nota: 8, \"comentario\": \"a, b: c\", Clean Code: {}}");
        assert_eq!(
            out,
            "{\"nota\": 8, \"comentario\": \"a, b: c\", \"Clean Code\": {}}"
        );
    }

    #[test]
    fn quotes_bare_values_but_not_literals() {
        let out = QuoteBareValues.apply("{\"comentario\": muito bom, \"nota\": 8/10, \"ok\": true}");
        assert_eq!(
            out,
            "{\"comentario\": \"muito bom\", \"nota\": \"8/10\", \"ok\": true}"
        );
    }

    #[test]
    fn removes_trailing_commas() {
        assert_eq!(
            TrailingCommas.apply("{\"a\": [1, 2,], \"b\": \"x,}\",}"),
            "{\"a\": [1, 2], \"b\": \"x,}\"}"
        );
    }

    #[test]
    fn replaces_non_json_literals() {
        assert_eq!(
            NonJsonLiterals.apply("{\"a\": undefined, \"b\": True, \"c\": \"NaN\"}"),
            "{\"a\": null, \"b\": true, \"c\": \"NaN\"}"
        );
    }

    #[test]
    fn closes_truncated_objects() {
        assert_eq!(
            CloseUnbalanced.apply("{\"a\": {\"b\": [1, 2,"),
            "{\"a\": {\"b\": [1, 2]}}"
        );
        assert_eq!(CloseUnbalanced.apply("{\"a\": \"cut"), "{\"a\": \"cut\"}");
    }

    #[test]
    fn pipeline_repairs_sloppy_model_output() {
        let sloppy = "{CleanCode: {nota: 8, comentario: 'bom uso de nomes',}, Security: {nota: 6/10, comentario: ok},}<|eot_id|>";
        let map = RepairPipeline::default().parse_object(sloppy).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({
                "CleanCode": {"nota": 8, "comentario": "bom uso de nomes"},
                "Security": {"nota": "6/10", "comentario": "ok"}
            })
        );
    }

    #[test]
    fn pipeline_repairs_bare_values_with_apostrophes() {
        let sloppy = "{CleanCode: {nota: 8, comentario: it's readable}, Security: {nota: 4, comentario: weak}}";
        let map = RepairPipeline::default().parse_object(sloppy).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({
                "CleanCode": {"nota": 8, "comentario": "it's readable"},
                "Security": {"nota": 4, "comentario": "weak"}
            })
        );
    }

    #[test]
    fn pipeline_rejects_non_objects() {
        assert!(RepairPipeline::default().parse_object("[1, 2]").is_err());
    }

    #[test]
    fn finds_fenced_and_bare_candidates() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nand also {\"b\": 2} done";
        assert_eq!(json_candidates(raw), vec!["{\"a\": 1}", "{\"b\": 2}"]);
    }

    #[test]
    fn candidate_braces_inside_strings_are_ignored() {
        let raw = "{\"a\": \"}{\", \"b\": {\"c\": 1}}";
        assert_eq!(json_candidates(raw), vec![raw]);
    }

    #[test]
    fn unterminated_candidate_runs_to_end() {
        let raw = "prefix {\"a\": {\"b\": 1";
        assert_eq!(json_candidates(raw), vec!["{\"a\": {\"b\": 1"]);
    }

    #[test]
    fn default_rule_order_is_stable() {
        assert_eq!(
            RepairPipeline::default().rule_names(),
            vec![
                "strip_sentinel_tokens",
                "typographic_quotes",
                "single_quoted_strings",
                "non_json_literals",
                "quote_object_keys",
                "quote_bare_values",
                "trailing_commas",
                "close_unbalanced",
            ]
        );
    }
}
