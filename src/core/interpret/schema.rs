use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::lexicon::{
    criterion_for_key, key_in, sentiment_score, subcriterion_for_key, tidy_text, COMMENT_FIELDS,
    NAME_FIELDS, OVERALL_COMMENT_FIELDS, ROOT_COMMENT_FIELDS, SCORE_FIELDS, SUBCRITERIA_FIELDS,
};
use super::{Extraction, InterpretError};
use crate::core::analysis::{Criterion, CriterionScore, SubcriterionScore};
use crate::core::score::{mean_score, raw_score_from_value, score_from_value};

const MAX_DEPTH: usize = 3;
const MAX_COMMENT_CHARS: usize = 1_000;

/// Projects a parsed reply onto the criterion vocabulary.
///
/// Two shapes are understood: the current one, a map of criterion name to
/// `{score, comment}` possibly nested under a wrapper such as `analiseGeral`
/// (or an array of objects naming their criterion), and the legacy one, a
/// flat map of CleanCode subcriteria with no criterion key at all.
pub fn reconcile(root: &Map<String, Value>) -> Result<Extraction, InterpretError> {
    let mut criteria = BTreeMap::new();

    if let Some(holder) = find_object(root, 0, &|obj: &Map<String, Value>| {
        obj.keys().any(|k| is_criterion_entry(obj, k))
    }) {
        for (key, value) in holder {
            if let Some(criterion) = criterion_for_key(key) {
                if criteria.contains_key(&criterion) {
                    continue;
                }
                if let Some(score) = parse_criterion(criterion, value) {
                    criteria.insert(criterion, score);
                }
            }
        }
    }

    if criteria.is_empty() {
        collect_named_entries(root, 0, &mut criteria);
    }

    if criteria.is_empty() {
        if let Some(holder) = find_object(root, 0, &|obj: &Map<String, Value>| {
            obj.keys().any(|k| subcriterion_for_key(k).is_some())
        }) {
            debug!("Reply uses the legacy subcriterion-only shape");
            if let Some(clean_code) = synthesize_clean_code(holder) {
                criteria.insert(Criterion::CleanCode, clean_code);
            }
        }
    }

    if criteria.is_empty() {
        return Err(InterpretError::UnknownSchema);
    }

    Ok(Extraction {
        criteria,
        overall_comment: overall_comment(root),
    })
}

fn is_criterion_entry(obj: &Map<String, Value>, key: &str) -> bool {
    criterion_for_key(key).is_some()
        && matches!(obj.get(key), Some(Value::Object(_) | Value::Number(_) | Value::String(_)))
}

/// Pre-order search for the first object satisfying `accept`, `MAX_DEPTH` levels deep.
fn find_object<'a>(
    obj: &'a Map<String, Value>,
    depth: usize,
    accept: &dyn Fn(&Map<String, Value>) -> bool,
) -> Option<&'a Map<String, Value>> {
    if accept(obj) {
        return Some(obj);
    }
    if depth >= MAX_DEPTH {
        return None;
    }
    obj.values()
        .filter_map(Value::as_object)
        .find_map(|child| find_object(child, depth + 1, accept))
}

/// `[{"criterio": "SOLID", "nota": 7, ...}, ...]` arrays anywhere in the reply.
fn collect_named_entries(
    obj: &Map<String, Value>,
    depth: usize,
    criteria: &mut BTreeMap<Criterion, CriterionScore>,
) {
    if depth > MAX_DEPTH {
        return;
    }
    for value in obj.values() {
        match value {
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_object) {
                    let criterion = item
                        .iter()
                        .find(|(k, _)| key_in(k, NAME_FIELDS))
                        .and_then(|(_, v)| v.as_str())
                        .and_then(criterion_for_key);
                    if let Some(criterion) = criterion {
                        if criteria.contains_key(&criterion) {
                            continue;
                        }
                        if let Some(score) = parse_criterion(criterion, &Value::Object(item.clone())) {
                            criteria.insert(criterion, score);
                        }
                    }
                }
            }
            Value::Object(child) => collect_named_entries(child, depth + 1, criteria),
            _ => {}
        }
    }
}

fn parse_criterion(criterion: Criterion, value: &Value) -> Option<CriterionScore> {
    match value {
        Value::Number(_) => Some(CriterionScore::new(score_from_value(value), String::new())),
        Value::String(text) => {
            let comment = tidy_text(text, MAX_COMMENT_CHARS);
            let score = match raw_score_from_value(value) {
                Some(_) => score_from_value(value),
                None => sentiment_score(text),
            };
            Some(CriterionScore::new(score, comment))
        }
        Value::Object(obj) => parse_criterion_object(criterion, obj),
        _ => None,
    }
}

fn parse_criterion_object(criterion: Criterion, obj: &Map<String, Value>) -> Option<CriterionScore> {
    let comment = comment_field(obj).unwrap_or_default();
    let subcriteria = if criterion == Criterion::CleanCode {
        collect_subcriteria(obj)
    } else {
        BTreeMap::new()
    };

    let score = match field(obj, SCORE_FIELDS) {
        // A present but unreadable score still counts, as zero.
        Some(value) => score_from_value(value),
        None => match mean_score(subcriteria.values().map(|s| s.score)) {
            Some(mean) => mean,
            None if !comment.is_empty() => sentiment_score(&comment),
            None => return None,
        },
    };

    Some(CriterionScore {
        score,
        comment,
        subcriteria,
    })
}

fn collect_subcriteria(obj: &Map<String, Value>) -> BTreeMap<String, SubcriterionScore> {
    let mut subs = BTreeMap::new();

    let nested = obj
        .iter()
        .filter(|(k, _)| key_in(k, SUBCRITERIA_FIELDS))
        .filter_map(|(_, v)| v.as_object());

    for source in std::iter::once(obj).chain(nested) {
        for (key, value) in source {
            let Some(sub) = subcriterion_for_key(key) else {
                continue;
            };
            if subs.contains_key(sub.key()) {
                continue;
            }
            if let Some(score) = parse_subcriterion(value) {
                subs.insert(sub.key().to_string(), score);
            }
        }
    }

    subs
}

fn parse_subcriterion(value: &Value) -> Option<SubcriterionScore> {
    match value {
        Value::Number(_) => Some(SubcriterionScore {
            score: score_from_value(value),
            comment: String::new(),
        }),
        Value::String(text) => raw_score_from_value(value).map(|_| SubcriterionScore {
            score: score_from_value(value),
            comment: tidy_text(text, MAX_COMMENT_CHARS),
        }),
        Value::Object(obj) => {
            let comment = comment_field(obj).unwrap_or_default();
            let score = match field(obj, SCORE_FIELDS) {
                Some(value) => score_from_value(value),
                None if !comment.is_empty() => sentiment_score(&comment),
                None => return None,
            };
            Some(SubcriterionScore { score, comment })
        }
        _ => None,
    }
}

fn synthesize_clean_code(holder: &Map<String, Value>) -> Option<CriterionScore> {
    let subcriteria = collect_subcriteria(holder);
    let score = mean_score(subcriteria.values().map(|s| s.score))?;

    let notes: Vec<String> = subcriteria
        .iter()
        .filter(|(_, s)| !s.comment.is_empty())
        .map(|(k, s)| format!("{}: {}", k, s.comment))
        .collect();
    let comment = if notes.is_empty() {
        format!("Derived from {} clean code subcriteria", subcriteria.len())
    } else {
        notes.join("; ")
    };

    Some(CriterionScore {
        score,
        comment,
        subcriteria,
    })
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    obj.iter().find(|(k, _)| key_in(k, names)).map(|(_, v)| v)
}

fn comment_field(obj: &Map<String, Value>) -> Option<String> {
    obj.iter()
        .filter(|(k, _)| key_in(k, COMMENT_FIELDS))
        .find_map(|(_, v)| text_value(v))
}

fn text_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => return None,
    };
    let text = tidy_text(&text, MAX_COMMENT_CHARS);
    (!text.is_empty()).then_some(text)
}

fn overall_comment(root: &Map<String, Value>) -> Option<String> {
    if let Some(text) = root
        .iter()
        .filter(|(k, _)| key_in(k, ROOT_COMMENT_FIELDS))
        .find_map(|(_, v)| text_value(v))
    {
        return Some(text);
    }
    find_overall(root, 0)
}

fn find_overall(obj: &Map<String, Value>, depth: usize) -> Option<String> {
    if let Some(text) = obj
        .iter()
        .filter(|(k, _)| key_in(k, OVERALL_COMMENT_FIELDS))
        .find_map(|(_, v)| text_value(v))
    {
        return Some(text);
    }
    if depth >= MAX_DEPTH {
        return None;
    }
    obj.iter()
        .filter(|(k, _)| criterion_for_key(k).is_none())
        .filter_map(|(_, v)| v.as_object())
        .find_map(|child| find_overall(child, depth + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reconcile_value(value: Value) -> Extraction {
        match value {
            Value::Object(map) => reconcile(&map).unwrap(),
            _ => panic!("test input must be an object"),
        }
    }

    #[test]
    fn reads_wrapped_current_shape() {
        let extraction = reconcile_value(json!({
            "analiseGeral": {"CleanCode": {"nota": 8, "comentario": "ok"}}
        }));
        assert_eq!(extraction.criteria.len(), 1);
        let clean = &extraction.criteria[&Criterion::CleanCode];
        assert_eq!(clean.score, 80);
        assert_eq!(clean.comment, "ok");
    }

    #[test]
    fn normalizes_criterion_synonyms() {
        let extraction = reconcile_value(json!({
            "Segurança": {"score": 40, "comment": "SQL built by concatenation"},
            "principios_solid": {"nota": "7/10", "justificativa": "SRP ok"},
            "testabilidade": 6,
        }));
        assert_eq!(extraction.criteria[&Criterion::Security].score, 40);
        assert_eq!(extraction.criteria[&Criterion::Solid].score, 70);
        assert_eq!(extraction.criteria[&Criterion::Solid].comment, "SRP ok");
        assert_eq!(extraction.criteria[&Criterion::Testability].score, 60);
    }

    #[test]
    fn synthesizes_clean_code_from_legacy_shape() {
        let extraction = reconcile_value(json!({
            "nomenclaturaVariaveis": {"nota": 7, "comentario": "bom"},
            "tamanhoFuncoes": {"nota": 5, "comentario": "longo"}
        }));
        assert_eq!(extraction.criteria.len(), 1);
        let clean = &extraction.criteria[&Criterion::CleanCode];
        assert_eq!(clean.score, 60);
        assert_eq!(clean.subcriteria["nomenclaturaVariaveis"].score, 70);
        assert_eq!(clean.subcriteria["tamanhoFuncoes"].score, 50);
        assert_eq!(clean.comment, "nomenclaturaVariaveis: bom; tamanhoFuncoes: longo");
    }

    #[test]
    fn keeps_nested_subcriteria_of_clean_code() {
        let extraction = reconcile_value(json!({
            "CleanCode": {
                "comentario": "nomes claros",
                "subcriterios": {
                    "variable_naming": {"score": 9},
                    "code duplication": {"score": 4, "comment": "copy-paste in handlers"}
                }
            }
        }));
        let clean = &extraction.criteria[&Criterion::CleanCode];
        assert_eq!(clean.score, 65);
        assert_eq!(clean.subcriteria["nomenclaturaVariaveis"].score, 90);
        assert_eq!(clean.subcriteria["duplicacaoCodigo"].comment, "copy-paste in handlers");
    }

    #[test]
    fn reads_named_criterion_arrays() {
        let extraction = reconcile_value(json!({
            "criterios": [
                {"criterio": "Design Patterns", "nota": 3, "comentario": "none used"},
                {"criterio": "Security", "nota": 90}
            ]
        }));
        assert_eq!(extraction.criteria[&Criterion::DesignPatterns].score, 30);
        assert_eq!(extraction.criteria[&Criterion::Security].score, 90);
    }

    #[test]
    fn unparsable_score_counts_as_zero() {
        let extraction = reconcile_value(json!({"SOLID": {"nota": "n/a", "comentario": "?"}}));
        assert_eq!(extraction.criteria[&Criterion::Solid].score, 0);
    }

    #[test]
    fn missing_score_falls_back_to_sentiment() {
        let extraction = reconcile_value(json!({"Security": {"comment": "insecure defaults and missing checks"}}));
        assert_eq!(extraction.criteria[&Criterion::Security].score, 30);
    }

    #[test]
    fn finds_overall_comment() {
        let extraction = reconcile_value(json!({
            "analise": {
                "SOLID": {"nota": 8},
                "comentarioGeral": "Mudança pequena e bem feita"
            }
        }));
        assert_eq!(extraction.overall_comment.as_deref(), Some("Mudança pequena e bem feita"));
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        let map = json!({"foo": {"bar": 1}}).as_object().cloned().unwrap();
        assert!(matches!(reconcile(&map), Err(InterpretError::UnknownSchema)));
    }
}
