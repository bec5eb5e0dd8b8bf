use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

use super::lexicon::{labels_alternation, sentiment_score, tidy_text, OVERALL_COMMENT_FIELDS};
use super::Extraction;
use crate::core::analysis::{Criterion, CriterionScore};
use crate::core::score::score_from_text;

const MAX_COMMENT_CHARS: usize = 500;
const NEARBY_CHARS: usize = 300;
const NUMBER_WINDOW_BYTES: usize = 60;
const MIN_PARAGRAPH_CHARS: usize = 40;
const MAX_PARAGRAPH_CHARS: usize = 1_500;

const BULLET: &str = r"^[ \t>*#•+-]*(?:\d+[.)][ \t]*)?\**[ \t]*";
const SCORE: &str = r"(?P<score>\d+(?:[.,]\d+)?(?:[ \t]*/[ \t]*\d+(?:[.,]\d+)?)?)";

struct CriterionMatcher {
    criterion: Criterion,
    label_first: Regex,
    score_first: Regex,
    mention: Regex,
}

static MATCHERS: Lazy<Vec<CriterionMatcher>> = Lazy::new(|| {
    Criterion::ALL
        .iter()
        .map(|&criterion| {
            let labels = labels_alternation(criterion.text_labels());
            CriterionMatcher {
                criterion,
                label_first: Regex::new(&format!(
                    r"(?im){BULLET}(?:{labels})\b\**[ \t]*[:\-–—=|(]?[ \t]*\**[ \t]*(?:(?:nota|score|pontua[cç][aã]o|rating)[ \t]*[:=]?[ \t]*)?\(?{SCORE}\)?\**[ \t]*(?:pontos|points|pts)?\**[ \t]*[-–—:.,;|)]?[ \t]*(?P<rest>.*)$"
                ))
                .unwrap(),
                score_first: Regex::new(&format!(
                    r"(?im){BULLET}\(?{SCORE}\)?\**[ \t]*[-–—:|]?[ \t]*\**[ \t]*(?:{labels})\b\**[ \t]*[:\-–—|]?[ \t]*(?P<rest>.*)$"
                ))
                .unwrap(),
                mention: Regex::new(&format!(r"(?i)\b(?:{labels})\b")).unwrap(),
            }
        })
        .collect()
});

static ANY_LABEL_LINE: Lazy<Regex> = Lazy::new(|| {
    let mut labels: Vec<&str> = Criterion::ALL
        .iter()
        .flat_map(|c| c.text_labels().iter().copied())
        .collect();
    labels.extend(OVERALL_COMMENT_FIELDS.iter().copied());
    Regex::new(&format!(r"(?i){BULLET}(?:{})\b", labels_alternation(&labels))).unwrap()
});

static OVERALL_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?im){BULLET}(?:{})\**[ \t]*(?::\**[ \t]*(?P<rest>.*))?$",
        labels_alternation(OVERALL_COMMENT_FIELDS)
    ))
    .unwrap()
});

static NEW_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:[-*•#>]|\d+[.)]\s)").unwrap());
static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?(?:\s*/\s*\d+(?:[.,]\d+)?)?").unwrap());
static FENCED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").unwrap());

/// Scores whatever criteria the prose mentions.
///
/// A labeled line (`Segurança: 6/10 - falta validação`, `8/10 Clean Code`)
/// gives score and comment directly. Failing that, the first number shortly
/// after any mention of the label is used, and failing that the wording
/// around the mention is classified as positive, negative or neutral.
/// Criteria never mentioned are left out.
pub fn extract(raw: &str) -> Extraction {
    let mut criteria = BTreeMap::new();

    for matcher in MATCHERS.iter() {
        let score = labeled_score(matcher, raw).or_else(|| nearby_score(matcher, raw));
        if let Some(score) = score {
            criteria.insert(matcher.criterion, score);
        }
    }

    Extraction {
        criteria,
        overall_comment: overall_comment(raw),
    }
}

fn labeled_score(matcher: &CriterionMatcher, raw: &str) -> Option<CriterionScore> {
    let caps = matcher.label_first.captures(raw).or_else(|| {
        matcher
            .score_first
            .captures_iter(raw)
            .find(|caps| !is_list_index(caps, raw))
    })?;

    let score = score_from_text(&caps["score"]);
    let mut comment = comment_span(&caps, raw);
    if comment.is_empty() {
        comment = tidy_text(&caps[0], MAX_COMMENT_CHARS);
    }

    Some(CriterionScore::new(score, comment))
}

/// True when the captured score is really a list index such as the `1` of
/// `1) Security - ...` or `2. Clean Code: ...`.
fn is_list_index(caps: &Captures, raw: &str) -> bool {
    let Some(score) = caps.name("score") else {
        return false;
    };
    let line_start = raw[..score.start()].rfind('\n').map_or(0, |i| i + 1);
    let leads_line = raw[line_start..score.start()]
        .chars()
        .all(|c| matches!(c, ' ' | '\t' | '>' | '*' | '#' | '•' | '+' | '-'));
    let closes_index = matches!(raw[score.end()..].chars().next(), Some(')' | '.'));

    leads_line && closes_index && score.as_str().chars().all(|c| c.is_ascii_digit())
}

fn comment_span(caps: &Captures, raw: &str) -> String {
    let mut parts = Vec::new();
    if let Some(rest) = caps.name("rest") {
        let rest = rest.as_str().trim().trim_matches('*').trim();
        if !rest.is_empty() {
            parts.push(rest.to_string());
        }
    }
    let end = caps.get(0).map_or(raw.len(), |m| m.end());
    parts.extend(continuation(raw, end, false));
    tidy_text(&parts.join(" "), MAX_COMMENT_CHARS)
}

/// Lines following the one that ends at `end`, up to a blank line, a new
/// bullet or heading, or another label.
fn continuation(raw: &str, end: usize, skip_leading_blank: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut skipping = skip_leading_blank;

    for line in raw[end..].lines().skip(1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if skipping {
                continue;
            }
            break;
        }
        skipping = false;
        if NEW_SECTION.is_match(line) || ANY_LABEL_LINE.is_match(line) || trimmed.starts_with("```") {
            break;
        }
        lines.push(trimmed.to_string());
    }

    lines
}

fn nearby_score(matcher: &CriterionMatcher, raw: &str) -> Option<CriterionScore> {
    let mention = matcher.mention.find(raw)?;

    let line_start = raw[..mention.start()].rfind('\n').map_or(0, |i| i + 1);
    let after = &raw[mention.end()..];
    let window_len = after
        .char_indices()
        .nth(NEARBY_CHARS)
        .map_or(after.len(), |(i, _)| i);
    let window = &after[..window_len];
    let window = match BLANK_LINE.find(window) {
        Some(m) => &window[..m.start()],
        None => window,
    };
    let window = cut_at_next_item(window);

    let score = match NUMBER.find(window) {
        Some(number) if number.start() < NUMBER_WINDOW_BYTES => score_from_text(number.as_str()),
        _ => sentiment_score(window),
    };
    let comment = tidy_text(
        &raw[line_start..mention.end() + window.len()],
        MAX_COMMENT_CHARS,
    );

    Some(CriterionScore::new(score, comment))
}

/// Keeps the first line of `window` and the lines after it up to the next
/// bullet, numbered item or label line.
fn cut_at_next_item(window: &str) -> &str {
    let mut offset = 0;
    for (idx, line) in window.split_inclusive('\n').enumerate() {
        if idx > 0 && (NEW_SECTION.is_match(line) || ANY_LABEL_LINE.is_match(line)) {
            return &window[..offset];
        }
        offset += line.len();
    }
    window
}

/// Text after an explicit general-comment label such as `Comentário geral:`
/// or a `## Resumo` heading.
pub fn overall_comment(raw: &str) -> Option<String> {
    let caps = OVERALL_LABEL.captures(raw)?;
    let end = caps.get(0).map_or(raw.len(), |m| m.end());

    let mut parts = Vec::new();
    let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or("");
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts.extend(continuation(raw, end, rest.is_empty()));

    let text = tidy_text(&parts.join(" "), MAX_PARAGRAPH_CHARS);
    (!text.is_empty()).then_some(text)
}

/// First prose paragraph of a sensible size, ignoring code blocks, JSON
/// and paragraphs that carry criterion labels.
pub fn first_paragraph(raw: &str) -> Option<String> {
    let without_code = FENCED.replace_all(raw, "\n\n");

    BLANK_LINE
        .split(&without_code)
        .map(str::trim)
        .filter(|p| !p.starts_with(|c: char| "{[\"|<#".contains(c)))
        .filter(|p| !p.lines().any(|line| ANY_LABEL_LINE.is_match(line)))
        .map(|p| tidy_text(p, MAX_PARAGRAPH_CHARS + 1))
        .find(|p| {
            let len = p.chars().count();
            (MIN_PARAGRAPH_CHARS..=MAX_PARAGRAPH_CHARS).contains(&len)
        })
}
