use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const NEUTRAL_SCORE: u8 = 50;
pub const PLACEHOLDER_COMMENT: &str = "insufficient information";
pub const FALLBACK_COMMENT: &str = "No valid analysis could be extracted from the model response.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Criterion {
    CleanCode,
    #[serde(rename = "SOLID")]
    Solid,
    DesignPatterns,
    Testability,
    Security,
}

impl Criterion {
    pub const ALL: [Criterion; 5] = [
        Criterion::CleanCode,
        Criterion::Solid,
        Criterion::DesignPatterns,
        Criterion::Testability,
        Criterion::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::CleanCode => "CleanCode",
            Criterion::Solid => "SOLID",
            Criterion::DesignPatterns => "DesignPatterns",
            Criterion::Testability => "Testability",
            Criterion::Security => "Security",
        }
    }

    /// Key synonyms a model may use for this criterion in JSON, lowercase
    /// and without accents. Matching folds case and accents on the other side.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Criterion::CleanCode => &[
                "clean code",
                "codigo limpo",
                "clean",
                "qualidade do codigo",
                "legibilidade",
            ],
            Criterion::Solid => &["solid", "principios solid", "solid principles"],
            Criterion::DesignPatterns => &[
                "design patterns",
                "design pattern",
                "padroes de projeto",
                "padrao de projeto",
                "padroes de design",
                "padroes",
                "patterns",
            ],
            Criterion::Testability => &[
                "testability",
                "testabilidade",
                "testes",
                "testing",
                "tests",
            ],
            Criterion::Security => &["security", "seguranca", "secure", "seguro"],
        }
    }

    /// Labels searched for in prose. Narrower than [`Criterion::labels`]
    /// because words like "clean" or "tests" show up in ordinary sentences.
    pub fn text_labels(&self) -> &'static [&'static str] {
        match self {
            Criterion::CleanCode => &["clean code", "codigo limpo", "cleancode"],
            Criterion::Solid => &["principios solid", "solid principles", "solid"],
            Criterion::DesignPatterns => &[
                "design patterns",
                "design pattern",
                "padroes de projeto",
                "padrao de projeto",
                "designpatterns",
            ],
            Criterion::Testability => &["testabilidade", "testability"],
            Criterion::Security => &["seguranca", "security"],
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five fixed facets of the CleanCode criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subcriterion {
    VariableNaming,
    MethodNaming,
    FunctionSize,
    CommentUsage,
    CodeDuplication,
}

impl Subcriterion {
    pub const ALL: [Subcriterion; 5] = [
        Subcriterion::VariableNaming,
        Subcriterion::MethodNaming,
        Subcriterion::FunctionSize,
        Subcriterion::CommentUsage,
        Subcriterion::CodeDuplication,
    ];

    /// Key used in `CriterionScore::subcriteria`.
    pub fn key(&self) -> &'static str {
        match self {
            Subcriterion::VariableNaming => "nomenclaturaVariaveis",
            Subcriterion::MethodNaming => "nomenclaturaMetodos",
            Subcriterion::FunctionSize => "tamanhoFuncoes",
            Subcriterion::CommentUsage => "usoComentarios",
            Subcriterion::CodeDuplication => "duplicacaoCodigo",
        }
    }

    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Subcriterion::VariableNaming => &[
                "nomenclatura variaveis",
                "nomenclatura de variaveis",
                "nomes de variaveis",
                "variable naming",
                "variable names",
                "naming of variables",
            ],
            Subcriterion::MethodNaming => &[
                "nomenclatura metodos",
                "nomenclatura de metodos",
                "nomes de metodos",
                "method naming",
                "method names",
                "function naming",
            ],
            Subcriterion::FunctionSize => &[
                "tamanho funcoes",
                "tamanho das funcoes",
                "tamanho de funcoes",
                "tamanho dos metodos",
                "function size",
                "function length",
                "method size",
            ],
            Subcriterion::CommentUsage => &[
                "uso comentarios",
                "uso de comentarios",
                "comentarios",
                "comment usage",
                "use of comments",
                "comments",
            ],
            Subcriterion::CodeDuplication => &[
                "duplicacao codigo",
                "duplicacao de codigo",
                "duplicacao",
                "code duplication",
                "duplication",
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubcriterionScore {
    pub score: u8,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriterionScore {
    pub score: u8,
    pub comment: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subcriteria: BTreeMap<String, SubcriterionScore>,
}

impl CriterionScore {
    pub fn new(score: u8, comment: impl Into<String>) -> Self {
        Self {
            score,
            comment: comment.into(),
            subcriteria: BTreeMap::new(),
        }
    }

    pub fn placeholder() -> Self {
        Self::new(NEUTRAL_SCORE, PLACEHOLDER_COMMENT)
    }

    pub fn is_placeholder(&self) -> bool {
        self.score == NEUTRAL_SCORE && self.comment == PLACEHOLDER_COMMENT && self.subcriteria.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefactoringProposal {
    pub title: String,
    pub description: String,
    pub original_code: Option<String>,
    pub proposed_code: Option<String>,
    pub justification: Option<String>,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub criteria: BTreeMap<Criterion, CriterionScore>,
    pub overall_score: u8,
    pub overall_comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refactoring_proposal: Option<RefactoringProposal>,
}

impl AnalysisResult {
    /// The degraded result returned when nothing could be extracted.
    pub fn fallback() -> Self {
        Self {
            criteria: Criterion::ALL
                .iter()
                .map(|c| (*c, CriterionScore::placeholder()))
                .collect(),
            overall_score: NEUTRAL_SCORE,
            overall_comment: FALLBACK_COMMENT.to_string(),
            refactoring_proposal: None,
        }
    }

    pub fn criterion(&self, criterion: Criterion) -> &CriterionScore {
        // Only deserialized values can lack a key.
        static PLACEHOLDER: once_cell::sync::Lazy<CriterionScore> =
            once_cell::sync::Lazy::new(CriterionScore::placeholder);
        self.criteria.get(&criterion).unwrap_or(&PLACEHOLDER)
    }

    pub fn is_fallback(&self) -> bool {
        self.overall_comment == FALLBACK_COMMENT
            && self.criteria.values().all(CriterionScore::is_placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_has_all_criteria() {
        let result = AnalysisResult::fallback();
        assert_eq!(result.criteria.len(), 5);
        assert_eq!(result.overall_score, 50);
        assert!(result.is_fallback());
        for criterion in Criterion::ALL {
            assert!(result.criterion(criterion).is_placeholder());
        }
    }

    #[test]
    fn serializes_with_canonical_keys() {
        let json = serde_json::to_value(AnalysisResult::fallback()).unwrap();
        let keys: Vec<&str> = json["criteria"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert!(keys.contains(&"SOLID"));
        assert!(keys.contains(&"CleanCode"));
        assert_eq!(json["overallScore"], 50);
        assert!(json.get("refactoringProposal").is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let mut result = AnalysisResult::fallback();
        result.refactoring_proposal = Some(RefactoringProposal {
            title: "Extract method".into(),
            description: "Split the loop body".into(),
            original_code: None,
            proposed_code: Some("fn helper() {}".into()),
            justification: None,
            priority: 3,
        });
        let text = serde_json::to_string(&result).unwrap();
        let back: AnalysisResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, result);
    }
}
