mod free_text;
pub mod lexicon;
pub mod refactoring;
pub mod repair;
mod schema;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::analysis::{AnalysisResult, Criterion, CriterionScore, RefactoringProposal, NEUTRAL_SCORE};
use crate::core::score::mean_score;
pub use repair::{RepairPipeline, RepairRule, DEFAULT_SENTINEL_TOKENS};

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("JSON value is not an object")]
    NotAnObject,
    #[error("no known analysis schema in the parsed JSON")]
    UnknownSchema,
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Criterion scores one tier managed to derive.
#[derive(Debug, Default)]
pub struct Extraction {
    pub criteria: BTreeMap<Criterion, CriterionScore>,
    pub overall_comment: Option<String>,
}

impl Extraction {
    pub fn is_usable(&self) -> bool {
        !self.criteria.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterpreterConfig {
    #[serde(default = "default_sentinel_tokens")]
    pub sentinel_tokens: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            sentinel_tokens: default_sentinel_tokens(),
        }
    }
}

pub fn default_sentinel_tokens() -> Vec<String> {
    DEFAULT_SENTINEL_TOKENS.iter().map(|t| t.to_string()).collect()
}

pub struct ResponseInterpreter {
    repair: RepairPipeline,
}

static DEFAULT_INTERPRETER: Lazy<ResponseInterpreter> =
    Lazy::new(|| ResponseInterpreter::new(&InterpreterConfig::default()));

/// Interprets `raw` with the built-in sentinel token list.
pub fn interpret(raw: &str) -> AnalysisResult {
    DEFAULT_INTERPRETER.interpret(raw)
}

impl ResponseInterpreter {
    pub fn new(config: &InterpreterConfig) -> Self {
        Self {
            repair: RepairPipeline::with_sentinel_tokens(config.sentinel_tokens.clone()),
        }
    }

    /// Always returns all five criteria. JSON in the reply is tried first,
    /// then labeled prose; when neither yields a score the fixed fallback
    /// result is returned. A refactoring proposal is looked for either way.
    pub fn interpret(&self, raw: &str) -> AnalysisResult {
        let objects = run_tier("structured", raw, || self.parse_candidates(raw)).unwrap_or_default();

        let extraction = run_tier("schema", raw, || reconcile_first(&objects))
            .or_else(|| run_tier("free_text", raw, || Ok(Some(free_text::extract(raw)))))
            .filter(Extraction::is_usable);

        let proposal = run_tier("refactoring", raw, || {
            Ok(objects
                .iter()
                .find_map(refactoring::from_json)
                .or_else(|| refactoring::from_text(raw)))
        });

        match extraction {
            Some(extraction) => run_tier("aggregate", raw, || Ok(Some(aggregate(extraction, raw))))
                .map(|mut result| {
                    result.refactoring_proposal = proposal.clone();
                    result
                })
                .unwrap_or_else(|| fallback(proposal)),
            None => {
                debug!("No criterion could be derived from a {}-byte response", raw.len());
                fallback(proposal)
            }
        }
    }

    fn parse_candidates(&self, raw: &str) -> Result<Option<Vec<Map<String, Value>>>, InterpretError> {
        let candidates = repair::json_candidates(raw);
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut objects = Vec::new();
        let mut last_error = None;
        for candidate in candidates {
            match self.repair.parse_object(candidate) {
                Ok(object) => objects.push(object),
                Err(e) => {
                    debug!("Discarding JSON candidate of {} bytes: {}", candidate.len(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if objects.is_empty() => Err(e),
            _ => Ok(Some(objects)),
        }
    }
}

fn reconcile_first(objects: &[Map<String, Value>]) -> Result<Option<Extraction>, InterpretError> {
    let mut last_error = None;
    for object in objects {
        match schema::reconcile(object) {
            Ok(extraction) if extraction.is_usable() => return Ok(Some(extraction)),
            Ok(_) => {}
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

fn aggregate(extraction: Extraction, raw: &str) -> AnalysisResult {
    let overall_score = mean_score(extraction.criteria.values().map(|c| c.score)).unwrap_or(NEUTRAL_SCORE);
    let overall_comment = extraction
        .overall_comment
        .or_else(|| free_text::overall_comment(raw))
        .or_else(|| free_text::first_paragraph(raw))
        .unwrap_or_default();

    let mut criteria = extraction.criteria;
    for criterion in Criterion::ALL {
        criteria.entry(criterion).or_insert_with(CriterionScore::placeholder);
    }

    AnalysisResult {
        criteria,
        overall_score,
        overall_comment,
        refactoring_proposal: None,
    }
}

fn fallback(proposal: Option<RefactoringProposal>) -> AnalysisResult {
    AnalysisResult {
        refactoring_proposal: proposal,
        ..AnalysisResult::fallback()
    }
}

/// Runs one tier, turning errors and panics into "nothing produced".
fn run_tier<T>(
    tier: &str,
    raw: &str,
    f: impl FnOnce() -> Result<Option<T>, InterpretError>,
) -> Option<T> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        Err(InterpretError::Panicked(message))
    });

    match outcome {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Interpretation tier '{}' produced nothing for a {}-byte response: {}",
                tier,
                raw.len(),
                e
            );
            None
        }
    }
}
