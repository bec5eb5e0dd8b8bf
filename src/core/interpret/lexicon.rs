use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

use crate::core::analysis::{Criterion, Subcriterion};

pub const SCORE_FIELDS: &[&str] = &[
    "score", "nota", "pontuacao", "pontos", "rating", "grade", "valor", "value",
];

pub const COMMENT_FIELDS: &[&str] = &[
    "comment",
    "comentario",
    "justificativa",
    "justification",
    "feedback",
    "observacao",
    "observacoes",
    "descricao",
    "description",
    "explicacao",
    "explanation",
    "motivo",
    "reason",
    "analise",
    "analysis",
];

pub const SUBCRITERIA_FIELDS: &[&str] = &[
    "subcriterios",
    "subcriteria",
    "subcriterio",
    "subcriterion",
    "detalhes",
    "details",
];

pub const NAME_FIELDS: &[&str] = &["criterio", "criterion", "nome", "name", "categoria", "category"];

pub const OVERALL_COMMENT_FIELDS: &[&str] = &[
    "comentario geral",
    "comentario final",
    "overall comment",
    "general comment",
    "overall",
    "analise geral",
    "avaliacao geral",
    "parecer",
    "parecer geral",
    "resumo",
    "summary",
    "conclusao",
    "conclusion",
];

/// Comment keys that only count as the overall comment at the top level.
pub const ROOT_COMMENT_FIELDS: &[&str] = &["comentario", "comment", "observacoes"];

const POSITIVE_WORDS: &[&str] = &[
    "bom", "boa", "bons", "boas", "otimo", "otima", "excelente", "adequado", "adequada",
    "adequados", "claro", "clara", "claros", "limpo", "limpa", "organizado", "organizada",
    "consistente", "coeso", "coesa", "seguro", "segura", "robusto", "robusta", "legivel",
    "bem", "elegante", "positivo", "good", "great", "excellent", "clean", "clear", "readable",
    "well", "strong", "consistent", "robust", "secure", "appropriate", "nice", "elegant",
    "positive",
];

const NEGATIVE_WORDS: &[&str] = &[
    "ruim", "ruins", "fraco", "fraca", "problema", "problemas", "problematico", "confuso",
    "confusa", "ausente", "ausencia", "falta", "faltam", "inseguro", "insegura", "vulneravel",
    "vulnerabilidade", "duplicado", "duplicada", "complexo", "complexa", "acoplado", "risco",
    "negativo", "poor", "bad", "weak", "missing", "lacks", "lack", "lacking", "confusing",
    "problem", "problems", "issue", "issues", "vulnerable", "vulnerability", "insecure",
    "duplicated", "messy", "hardcoded", "risk", "negative",
];

pub const POSITIVE_SCORE: u8 = 70;
pub const NEGATIVE_SCORE: u8 = 30;

static CRITERION_KEYS: Lazy<HashMap<String, Criterion>> = Lazy::new(|| {
    let mut keys = HashMap::new();
    for criterion in Criterion::ALL {
        keys.insert(fold_key(criterion.as_str()), criterion);
        for label in criterion.labels() {
            keys.entry(fold_key(label)).or_insert(criterion);
        }
    }
    keys
});

static SUBCRITERION_KEYS: Lazy<HashMap<String, Subcriterion>> = Lazy::new(|| {
    let mut keys = HashMap::new();
    for sub in Subcriterion::ALL {
        keys.insert(fold_key(sub.key()), sub);
        for label in sub.labels() {
            keys.entry(fold_key(label)).or_insert(sub);
        }
    }
    keys
});

static POSITIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| POSITIVE_WORDS.iter().copied().collect());
static NEGATIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| NEGATIVE_WORDS.iter().copied().collect());

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Lowercase, accent-free, alphanumeric-only form used to compare keys:
/// `"Segurança"`, `"seguranca"` and `"SEGURANCA"` all fold to `seguranca`,
/// `"clean_code"` and `"Clean Code"` to `cleancode`.
pub fn fold_key(key: &str) -> String {
    key.chars()
        .flat_map(char::to_lowercase)
        .map(fold_char)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

pub fn criterion_for_key(key: &str) -> Option<Criterion> {
    CRITERION_KEYS.get(&fold_key(key)).copied()
}

pub fn subcriterion_for_key(key: &str) -> Option<Subcriterion> {
    SUBCRITERION_KEYS.get(&fold_key(key)).copied()
}

pub fn key_in(key: &str, names: &[&str]) -> bool {
    let folded = fold_key(key);
    names.iter().any(|name| fold_key(name) == folded)
}

/// Regex fragment for one label: spaces match any run of whitespace,
/// underscores or hyphens (or nothing), vowels and `c`/`n` match their
/// accented forms. Use with the `i` flag.
pub fn label_pattern(label: &str) -> String {
    let mut pattern = String::new();
    for c in label.chars() {
        match c {
            ' ' => pattern.push_str(r"[\s_-]*"),
            'a' => pattern.push_str("[aáàâãä]"),
            'e' => pattern.push_str("[eéèêë]"),
            'i' => pattern.push_str("[iíìîï]"),
            'o' => pattern.push_str("[oóòôõö]"),
            'u' => pattern.push_str("[uúùûü]"),
            'c' => pattern.push_str("[cç]"),
            'n' => pattern.push_str("[nñ]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern
}

/// Alternation of label patterns, longest label first so that
/// "clean code" wins over a shorter prefix.
pub fn labels_alternation(labels: &[&str]) -> String {
    let mut sorted: Vec<&str> = labels.to_vec();
    sorted.sort_by_key(|l| std::cmp::Reverse(l.len()));
    sorted
        .iter()
        .map(|l| label_pattern(l))
        .collect::<Vec<_>>()
        .join("|")
}

/// 70 for mostly positive wording, 30 for mostly negative, 50 otherwise.
pub fn sentiment_score(text: &str) -> u8 {
    let (mut positive, mut negative) = (0usize, 0usize);
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let word = fold_key(word);
        if POSITIVE.contains(word.as_str()) {
            positive += 1;
        } else if NEGATIVE.contains(word.as_str()) {
            negative += 1;
        }
    }

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => POSITIVE_SCORE,
        std::cmp::Ordering::Less => NEGATIVE_SCORE,
        std::cmp::Ordering::Equal => crate::core::analysis::NEUTRAL_SCORE,
    }
}

/// Collapses runs of whitespace and caps the result at `max_chars` characters.
pub fn tidy_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", collapsed[..cut].trim_end()),
        None => collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn folds_case_accents_and_separators() {
        assert_eq!(fold_key("Segurança"), "seguranca");
        assert_eq!(fold_key("clean_code"), "cleancode");
        assert_eq!(fold_key("Padrões de Projeto"), "padroesdeprojeto");
    }

    #[test]
    fn resolves_criterion_synonyms() {
        assert_eq!(criterion_for_key("seguranca"), Some(Criterion::Security));
        assert_eq!(criterion_for_key("Segurança"), Some(Criterion::Security));
        assert_eq!(criterion_for_key("SECURITY"), Some(Criterion::Security));
        assert_eq!(criterion_for_key("SOLID"), Some(Criterion::Solid));
        assert_eq!(criterion_for_key("design_patterns"), Some(Criterion::DesignPatterns));
        assert_eq!(criterion_for_key("codigoLimpo"), Some(Criterion::CleanCode));
        assert_eq!(criterion_for_key("nota"), None);
    }

    #[test]
    fn resolves_subcriterion_synonyms() {
        assert_eq!(
            subcriterion_for_key("nomenclaturaVariaveis"),
            Some(Subcriterion::VariableNaming)
        );
        assert_eq!(
            subcriterion_for_key("function_size"),
            Some(Subcriterion::FunctionSize)
        );
        assert_eq!(
            subcriterion_for_key("Duplicação de Código"),
            Some(Subcriterion::CodeDuplication)
        );
        assert_eq!(subcriterion_for_key("comentario"), None);
    }

    #[test]
    fn label_pattern_matches_accented_variants() {
        let re = Regex::new(&format!("(?i)^(?:{})$", labels_alternation(&["seguranca"]))).unwrap();
        assert!(re.is_match("Segurança"));
        assert!(re.is_match("SEGURANCA"));
        let re = Regex::new(&format!("(?i)^(?:{})$", labels_alternation(&["clean code"]))).unwrap();
        assert!(re.is_match("Clean Code"));
        assert!(re.is_match("clean_code"));
        assert!(re.is_match("CleanCode"));
    }

    #[test]
    fn sentiment_counts_word_lists() {
        assert_eq!(sentiment_score("Código limpo e bem organizado"), 70);
        assert_eq!(sentiment_score("Missing validation, insecure defaults"), 30);
        assert_eq!(sentiment_score("Nothing to say"), 50);
        assert_eq!(sentiment_score("good but insecure"), 50);
    }

    #[test]
    fn tidy_text_collapses_and_caps() {
        assert_eq!(tidy_text("a \n\n  b", 10), "a b");
        assert_eq!(tidy_text("abcdefgh", 3), "abc...");
    }
}
