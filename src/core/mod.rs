pub mod analysis;
pub mod diff_engine;
pub mod git;
pub mod interpret;
pub mod pipeline;
pub mod prompt;
pub mod score;
pub mod store;

pub use analysis::{AnalysisResult, Criterion, CriterionScore, RefactoringProposal};
pub use diff_engine::{compute_diff, compute_diff_with_limits, DiffEntry, DiffKind, DiffLimits};
pub use git::{GitIntegration, RevisionSource};
pub use interpret::{interpret, ResponseInterpreter};
pub use pipeline::{AnalysisPipeline, CommitReport};
pub use prompt::PromptBuilder;
pub use store::{JsonFileStore, MemoryStore, ResultStore};
