use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::lexicon::{fold_key, key_in, labels_alternation, tidy_text};
use crate::core::analysis::RefactoringProposal;

pub const DEFAULT_TITLE: &str = "Refactoring proposal";
pub const DEFAULT_PRIORITY: u8 = 3;

const MAX_DEPTH: usize = 3;
const MAX_TITLE_CHARS: usize = 120;
const MAX_TEXT_CHARS: usize = 2_000;

const PROPOSAL_FIELDS: &[&str] = &[
    "propostaRefatoracao",
    "propostaDeRefatoracao",
    "sugestaoRefatoracao",
    "refatoracao",
    "refactoringProposal",
    "refactoringSuggestion",
    "refactoring",
];
const TITLE_FIELDS: &[&str] = &["titulo", "title"];
const DESCRIPTION_FIELDS: &[&str] = &["descricao", "description", "detalhes", "details"];
const ORIGINAL_CODE_FIELDS: &[&str] = &[
    "codigoOriginal",
    "codigoAtual",
    "originalCode",
    "currentCode",
    "before",
    "antes",
];
const PROPOSED_CODE_FIELDS: &[&str] = &[
    "codigoRefatorado",
    "codigoProposto",
    "codigoSugerido",
    "proposedCode",
    "refactoredCode",
    "suggestedCode",
    "after",
    "depois",
];
const JUSTIFICATION_FIELDS: &[&str] = &["justificativa", "justification", "motivo", "reason", "beneficios", "benefits"];
const PRIORITY_FIELDS: &[&str] = &["prioridade", "priority"];

const TITLE_LABELS: &[&str] = &["titulo", "title"];
const DESCRIPTION_LABELS: &[&str] = &["descricao", "description"];
const ORIGINAL_CODE_LABELS: &[&str] = &["codigo original", "codigo atual", "original code", "current code", "antes", "before"];
const PROPOSED_CODE_LABELS: &[&str] = &[
    "codigo refatorado",
    "codigo proposto",
    "codigo sugerido",
    "refactored code",
    "proposed code",
    "suggested code",
    "depois",
    "after",
];
const JUSTIFICATION_LABELS: &[&str] = &["justificativa", "justification", "motivo", "reason"];
const PRIORITY_LABELS: &[&str] = &["prioridade", "priority"];

static REFACTOR_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)refat[oó]r|refactor").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?").unwrap());
static FENCED_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").unwrap());

fn field_line(labels: &[&str]) -> Regex {
    Regex::new(&format!(
        r"(?im)^[ \t>*#•+-]*(?:\d+[.)][ \t]*)?\**[ \t]*(?:{})\**[ \t]*:\**[ \t]*(?P<rest>.*)$",
        labels_alternation(labels)
    ))
    .unwrap()
}

static TITLE_LINE: Lazy<Regex> = Lazy::new(|| field_line(TITLE_LABELS));
static DESCRIPTION_LINE: Lazy<Regex> = Lazy::new(|| field_line(DESCRIPTION_LABELS));
static ORIGINAL_CODE_LINE: Lazy<Regex> = Lazy::new(|| field_line(ORIGINAL_CODE_LABELS));
static PROPOSED_CODE_LINE: Lazy<Regex> = Lazy::new(|| field_line(PROPOSED_CODE_LABELS));
static JUSTIFICATION_LINE: Lazy<Regex> = Lazy::new(|| field_line(JUSTIFICATION_LABELS));
static PRIORITY_LINE: Lazy<Regex> = Lazy::new(|| field_line(PRIORITY_LABELS));

fn field_lines() -> [&'static Regex; 6] {
    [
        &*TITLE_LINE,
        &*DESCRIPTION_LINE,
        &*ORIGINAL_CODE_LINE,
        &*PROPOSED_CODE_LINE,
        &*JUSTIFICATION_LINE,
        &*PRIORITY_LINE,
    ]
}

/// Reads a proposal object such as `{"propostaRefatoracao": {"titulo": ...}}`
/// from anywhere in the first few levels of a parsed reply.
pub fn from_json(root: &Map<String, Value>) -> Option<RefactoringProposal> {
    let value = find_proposal(root, 0)?;
    match value {
        Value::Object(obj) => from_object(obj),
        Value::Array(items) => items.iter().filter_map(Value::as_object).find_map(from_object),
        Value::String(text) => {
            let description = tidy_text(text, MAX_TEXT_CHARS);
            (!description.is_empty()).then(|| RefactoringProposal {
                title: title_from_description(&description),
                description,
                original_code: None,
                proposed_code: None,
                justification: None,
                priority: DEFAULT_PRIORITY,
            })
        }
        _ => None,
    }
}

fn find_proposal(obj: &Map<String, Value>, depth: usize) -> Option<&Value> {
    if let Some((_, value)) = obj.iter().find(|(k, _)| key_in(k, PROPOSAL_FIELDS)) {
        return Some(value);
    }
    if depth >= MAX_DEPTH {
        return None;
    }
    obj.values()
        .filter_map(Value::as_object)
        .find_map(|child| find_proposal(child, depth + 1))
}

fn from_object(obj: &Map<String, Value>) -> Option<RefactoringProposal> {
    let text = |names: &[&str]| {
        obj.iter()
            .find(|(k, _)| key_in(k, names))
            .and_then(|(_, v)| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let title = text(TITLE_FIELDS).map(|t| tidy_text(&t, MAX_TITLE_CHARS));
    let description = text(DESCRIPTION_FIELDS).map(|d| tidy_text(&d, MAX_TEXT_CHARS));
    let original_code = text(ORIGINAL_CODE_FIELDS);
    let proposed_code = text(PROPOSED_CODE_FIELDS);
    let justification = text(JUSTIFICATION_FIELDS).map(|j| tidy_text(&j, MAX_TEXT_CHARS));

    if title.is_none() && description.is_none() && proposed_code.is_none() {
        return None;
    }

    let priority = obj
        .iter()
        .find(|(k, _)| key_in(k, PRIORITY_FIELDS))
        .map_or(DEFAULT_PRIORITY, |(_, v)| priority_from_value(v));
    let description = description.unwrap_or_default();

    Some(RefactoringProposal {
        title: title.unwrap_or_else(|| title_from_description(&description)),
        description,
        original_code,
        proposed_code,
        justification,
        priority,
    })
}

/// Reads `Título:`, `Descrição:`, `Código refatorado:` style lines that
/// follow a mention of refactoring in prose. Code is taken from the fenced
/// block after its label, or from the section's fenced blocks in order.
/// The section needs a title, a description or a code block.
pub fn from_text(raw: &str) -> Option<RefactoringProposal> {
    let marker = REFACTOR_MARKER.find(raw)?;
    let section_start = raw[..marker.start()].rfind('\n').map_or(0, |i| i + 1);
    let section = &raw[section_start..];

    if !field_lines().iter().any(|re| re.is_match(section)) {
        return None;
    }

    let title = labeled_text(&TITLE_LINE, section).map(|t| tidy_text(&t, MAX_TITLE_CHARS));
    let description = labeled_text(&DESCRIPTION_LINE, section)
        .map(|d| tidy_text(&d, MAX_TEXT_CHARS))
        .unwrap_or_default();
    // A reason or priority on its own does not describe any change.
    if title.is_none() && description.is_empty() && !FENCED_BODY.is_match(section) {
        return None;
    }
    let justification = labeled_text(&JUSTIFICATION_LINE, section).map(|j| tidy_text(&j, MAX_TEXT_CHARS));
    let priority = labeled_text(&PRIORITY_LINE, section)
        .map_or(DEFAULT_PRIORITY, |p| priority_from_text(&p));

    let mut original_code = labeled_code(&ORIGINAL_CODE_LINE, section);
    let mut proposed_code = labeled_code(&PROPOSED_CODE_LINE, section);
    if original_code.is_none() && proposed_code.is_none() {
        let blocks: Vec<String> = FENCED_BODY
            .captures_iter(section)
            .map(|c| c[1].trim_end().to_string())
            .collect();
        match blocks.as_slice() {
            [] => {}
            [only] => proposed_code = Some(only.clone()),
            [first, second, ..] => {
                original_code = Some(first.clone());
                proposed_code = Some(second.clone());
            }
        }
    }

    Some(RefactoringProposal {
        title: title.unwrap_or_else(|| title_from_description(&description)),
        description,
        original_code,
        proposed_code,
        justification,
        priority,
    })
}

/// Text after the label plus any plain continuation lines.
fn labeled_text(label: &Regex, section: &str) -> Option<String> {
    let caps = label.captures(section)?;
    let mut parts = vec![caps["rest"].trim().trim_matches('*').trim().to_string()];
    let end = caps.get(0).map_or(section.len(), |m| m.end());

    for line in section[end..].lines().skip(1) {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("```")
            || trimmed.starts_with(&['-', '*', '#', '•'][..])
            || field_lines().iter().any(|re| re.is_match(line))
        {
            break;
        }
        parts.push(trimmed.to_string());
    }

    let text = parts.join(" ").trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn labeled_code(label: &Regex, section: &str) -> Option<String> {
    let caps = label.captures(section)?;
    let end = caps.get(0).map_or(section.len(), |m| m.end());
    let rest = caps["rest"].trim();

    if let Some(block) = FENCED_BODY.captures(&section[end..]) {
        let gap = &section[end..end + block.get(0).map_or(0, |m| m.start())];
        let next_label = field_lines().iter().any(|re| re.is_match(gap));
        if !next_label {
            return Some(block[1].trim_end().to_string());
        }
    }
    (!rest.is_empty() && !rest.starts_with("```")).then(|| rest.trim_matches('`').to_string())
}

fn title_from_description(description: &str) -> String {
    let first = description
        .split(|c| c == '.' || c == '\n')
        .map(str::trim)
        .find(|s| !s.is_empty());
    match first {
        Some(line) => tidy_text(line, MAX_TITLE_CHARS),
        None => DEFAULT_TITLE.to_string(),
    }
}

pub fn priority_from_value(value: &Value) -> u8 {
    match value {
        Value::Number(n) => n.as_f64().map_or(DEFAULT_PRIORITY, clamp_priority),
        Value::String(s) => priority_from_text(s),
        _ => DEFAULT_PRIORITY,
    }
}

/// Numeric priorities clamp into 1..=5; words map onto the same scale.
pub fn priority_from_text(text: &str) -> u8 {
    // "2/5" and "4 (alta)" both read their leading number.
    if let Some(number) = NUMBER
        .find(text)
        .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
    {
        return clamp_priority(number);
    }
    for word in text.split(|c: char| !c.is_alphanumeric()).map(fold_key) {
        let level = match word.as_str() {
            "critica" | "critico" | "critical" | "urgente" | "urgent" => 5,
            "alta" | "alto" | "high" => 4,
            "media" | "medio" | "medium" | "moderada" | "moderate" => 3,
            "baixa" | "baixo" | "low" => 2,
            "minima" | "minimo" | "minimal" | "trivial" => 1,
            _ => continue,
        };
        return level;
    }
    DEFAULT_PRIORITY
}

fn clamp_priority(value: f64) -> u8 {
    if !value.is_finite() {
        return DEFAULT_PRIORITY;
    }
    value.round().clamp(1.0, 5.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn reads_nested_proposal_object() {
        let root = object(json!({
            "analiseGeral": {
                "propostaRefatoracao": {
                    "titulo": "Extrair validação",
                    "descricao": "Mover a validação para um serviço.",
                    "codigoOriginal": "if x {}",
                    "codigoRefatorado": "validate(x)",
                    "justificativa": "Reuso",
                    "prioridade": "alta"
                }
            }
        }));
        let proposal = from_json(&root).unwrap();
        assert_eq!(proposal.title, "Extrair validação");
        assert_eq!(proposal.original_code.as_deref(), Some("if x {}"));
        assert_eq!(proposal.proposed_code.as_deref(), Some("validate(x)"));
        assert_eq!(proposal.justification.as_deref(), Some("Reuso"));
        assert_eq!(proposal.priority, 4);
    }

    #[test]
    fn numeric_priority_is_clamped() {
        let root = object(json!({"refactoring": {"title": "t", "priority": 9}}));
        assert_eq!(from_json(&root).unwrap().priority, 5);
        let root = object(json!({"refactoring": {"title": "t", "priority": 0}}));
        assert_eq!(from_json(&root).unwrap().priority, 1);
        let root = object(json!({"refactoring": {"title": "t"}}));
        assert_eq!(from_json(&root).unwrap().priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn title_falls_back_to_description() {
        let root = object(json!({"refactoringProposal": {"description": "Split the handler. It is long."}}));
        let proposal = from_json(&root).unwrap();
        assert_eq!(proposal.title, "Split the handler");
        assert_eq!(proposal.description, "Split the handler. It is long.");
    }

    #[test]
    fn empty_proposal_is_ignored() {
        let root = object(json!({"propostaRefatoracao": {"prioridade": 2}}));
        assert!(from_json(&root).is_none());
        assert!(from_json(&object(json!({"SOLID": 8}))).is_none());
    }

    #[test]
    fn reads_labeled_free_text() {
        let raw = "\
Clean Code: 7

## Proposta de refatoração
**Título:** Extract a repository
**Descrição:** Database access is spread across handlers.
**Código original:**
```rust
let rows = conn.query(sql)?;
```
**Código refatorado:**
```rust
let rows = repo.find_all()?;
```
**Justificativa:** Easier to test.
**Prioridade:** 2/5
";
        let proposal = from_text(raw).unwrap();
        assert_eq!(proposal.title, "Extract a repository");
        assert_eq!(proposal.description, "Database access is spread across handlers.");
        assert_eq!(proposal.original_code.as_deref(), Some("let rows = conn.query(sql)?;"));
        assert_eq!(proposal.proposed_code.as_deref(), Some("let rows = repo.find_all()?;"));
        assert_eq!(proposal.justification.as_deref(), Some("Easier to test."));
        assert_eq!(proposal.priority, 2);
    }

    #[test]
    fn unlabeled_code_blocks_fill_in_order() {
        let raw = "Refactoring suggestion\nDescription: inline the helper\n```\nold()\n```\n```\nnew()\n```\n";
        let proposal = from_text(raw).unwrap();
        assert_eq!(proposal.title, "inline the helper");
        assert_eq!(proposal.original_code.as_deref(), Some("old()"));
        assert_eq!(proposal.proposed_code.as_deref(), Some("new()"));
    }

    #[test]
    fn mention_without_labels_is_not_a_proposal() {
        assert!(from_text("No refactoring is needed here.").is_none());
        assert!(from_text("Title: unrelated").is_none());
    }

    #[test]
    fn reason_without_a_change_is_not_a_proposal() {
        assert!(from_text("No refactoring needed.\nReason: code is fine").is_none());
        assert!(from_text("Refactoring: none.\nPriority: low\nBefore: ok\nAfter: ok").is_none());
    }

    #[test]
    fn before_and_after_blocks_are_a_proposal() {
        let raw = "Refactoring\nBefore:\n```\nlet x = a + b;\n```\nAfter:\n```\nlet x = sum(a, b);\n```\nReason: reuse\n";
        let proposal = from_text(raw).unwrap();
        assert_eq!(proposal.title, DEFAULT_TITLE);
        assert_eq!(proposal.original_code.as_deref(), Some("let x = a + b;"));
        assert_eq!(proposal.proposed_code.as_deref(), Some("let x = sum(a, b);"));
        assert_eq!(proposal.justification.as_deref(), Some("reuse"));
    }

    #[test]
    fn maps_textual_priorities() {
        assert_eq!(priority_from_text("Crítica"), 5);
        assert_eq!(priority_from_text("high"), 4);
        assert_eq!(priority_from_text("média"), 3);
        assert_eq!(priority_from_text("baixa"), 2);
        assert_eq!(priority_from_text("trivial"), 1);
        assert_eq!(priority_from_text("whenever"), DEFAULT_PRIORITY);
    }
}
