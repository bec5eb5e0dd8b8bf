use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapters::llm::{LLMAdapter, LLMRequest};
use crate::config::Config;
use crate::core::analysis::AnalysisResult;
use crate::core::diff_engine::{
    compute_diff_with_limits, render_unified, DiffStats, TRUNCATION_MARKER,
};
use crate::core::git::{ChangeKind, ChangedPath, CommitInfo, RevisionSource};
use crate::core::interpret::ResponseInterpreter;
use crate::core::prompt::{FileChange, PromptBuilder, PromptConfig};
use crate::core::score::mean_score;
use crate::core::store::{AnalysisMetadata, ResultStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: String,
    pub change_kind: ChangeKind,
    pub record_id: String,
    pub diff_truncated: bool,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitReport {
    pub commit: CommitInfo,
    pub files: Vec<FileAnalysis>,
    /// Files left out: excluded, deleted, binary, unchanged text or over the per-commit cap.
    pub skipped: usize,
    /// Files stored by an earlier run and not sent to the model again.
    pub cached: usize,
    pub failed: usize,
    pub overall_score: Option<u8>,
}

/// A file ready to be sent to the model.
struct PreparedFile {
    path: String,
    change_kind: ChangeKind,
    diff_truncated: bool,
    system_prompt: String,
    user_prompt: String,
}

enum Preparation {
    Ready(PreparedFile),
    Skipped,
}

/// Runs commits through diff, model, interpretation and storage.
pub struct AnalysisPipeline {
    config: Config,
    adapter: Arc<dyn LLMAdapter>,
    store: Arc<dyn ResultStore>,
    interpreter: Arc<ResponseInterpreter>,
    prompt_builder: PromptBuilder,
}

impl AnalysisPipeline {
    pub fn new(config: Config, adapter: Arc<dyn LLMAdapter>, store: Arc<dyn ResultStore>) -> Self {
        let interpreter = Arc::new(ResponseInterpreter::new(&config.interpreter_config()));
        let mut prompt_config = PromptConfig::default();
        if let Some(custom_prompt) = &config.system_prompt {
            prompt_config.system_prompt = custom_prompt.clone();
        }

        Self {
            config,
            adapter,
            store,
            interpreter,
            prompt_builder: PromptBuilder::new(prompt_config),
        }
    }

    /// Analyzes every eligible file of `commit`. Files the store already
    /// holds for this commit are left alone unless `force` is set, so a rerun
    /// only retries the files that failed. Returns `None` when nothing was
    /// left to analyze because every eligible file was already stored.
    pub async fn analyze_commit(
        &self,
        source: &dyn RevisionSource,
        commit: &CommitInfo,
        force: bool,
    ) -> Result<Option<CommitReport>> {
        let changed = source.changed_paths(&commit.id)?;
        let parent = source.parent_revision(&commit.id)?;
        info!("Commit {}: {} changed files", commit.short_id, changed.len());

        let mut skipped = 0;
        let mut cached = 0;
        let mut failed = 0;
        let mut prepared = Vec::new();

        // libgit2 reads stay on this task; only model calls run concurrently.
        for changed_path in &changed {
            if !force && self.store.has_analysis(&commit.id, &changed_path.path)? {
                debug!("Already analyzed {} in {}", changed_path.path, commit.short_id);
                cached += 1;
                continue;
            }
            if prepared.len() >= self.config.max_files_per_commit {
                debug!("Per-commit file cap reached, skipping {}", changed_path.path);
                skipped += 1;
                continue;
            }
            match self.prepare_file(source, commit, parent.as_deref(), changed_path) {
                Ok(Preparation::Ready(file)) => prepared.push(file),
                Ok(Preparation::Skipped) => skipped += 1,
                Err(e) => {
                    warn!("Failed to prepare {} in {}: {:#}", changed_path.path, commit.short_id, e);
                    failed += 1;
                }
            }
        }

        if cached > 0 && prepared.is_empty() && failed == 0 {
            info!("Skipping already analyzed commit {}", commit.short_id);
            return Ok(None);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut tasks = JoinSet::new();
        for file in prepared {
            let semaphore = semaphore.clone();
            let adapter = self.adapter.clone();
            let interpreter = self.interpreter.clone();
            let model_name = self.config.model.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                let mut request = LLMRequest::new(file.system_prompt.clone(), file.user_prompt.clone());
                request.model = Some(model_name);
                let response = adapter.complete(request).await?;
                let analysis = interpreter.interpret(&response.content);
                let model = if response.model.is_empty() {
                    adapter.model_name().to_string()
                } else {
                    response.model
                };
                Ok::<_, anyhow::Error>((file, model, analysis))
            });
        }

        let mut files = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (file, model, analysis) = match joined {
                Ok(Ok(done)) => done,
                Ok(Err(e)) => {
                    warn!("Model call failed for commit {}: {:#}", commit.short_id, e);
                    failed += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Analysis task for commit {} did not finish: {}", commit.short_id, e);
                    failed += 1;
                    continue;
                }
            };

            let metadata = AnalysisMetadata {
                commit_id: commit.id.clone(),
                file_path: file.path.clone(),
                change_kind: file.change_kind.clone(),
                author: commit.author.clone(),
                committed_at: commit.time,
                model,
                analyzed_at: Utc::now(),
                diff_truncated: file.diff_truncated,
            };
            match self.store.save(&analysis, &metadata) {
                Ok(record_id) => files.push(FileAnalysis {
                    path: file.path,
                    change_kind: file.change_kind,
                    record_id,
                    diff_truncated: file.diff_truncated,
                    analysis,
                }),
                Err(e) => {
                    warn!("Failed to store analysis of {}: {:#}", file.path, e);
                    failed += 1;
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        let overall_score = mean_score(files.iter().map(|f| f.analysis.overall_score));
        info!(
            "Commit {}: {} analyzed, {} skipped, {} cached, {} failed",
            commit.short_id,
            files.len(),
            skipped,
            cached,
            failed
        );

        Ok(Some(CommitReport {
            commit: commit.clone(),
            files,
            skipped,
            cached,
            failed,
            overall_score,
        }))
    }

    fn prepare_file(
        &self,
        source: &dyn RevisionSource,
        commit: &CommitInfo,
        parent: Option<&str>,
        changed: &ChangedPath,
    ) -> Result<Preparation> {
        if self.config.is_excluded(&changed.path) {
            info!("Skipping excluded file: {}", changed.path);
            return Ok(Preparation::Skipped);
        }

        let old_path = match &changed.change_kind {
            ChangeKind::Deleted => {
                info!("Skipping deleted file: {}", changed.path);
                return Ok(Preparation::Skipped);
            }
            ChangeKind::Added => None,
            ChangeKind::Modified => Some(changed.path.as_str()),
            ChangeKind::Renamed { from } => Some(from.as_str()),
        };

        let new_content = match source.file_content_at_revision(&commit.id, &changed.path)? {
            Some(content) => content,
            None => {
                info!("Skipping non-text file: {}", changed.path);
                return Ok(Preparation::Skipped);
            }
        };
        let old_content = match (parent, old_path) {
            (Some(parent), Some(old_path)) => match source.file_content_at_revision(parent, old_path)? {
                Some(content) => content,
                None if changed.change_kind == ChangeKind::Modified => {
                    info!("Skipping non-text file: {}", changed.path);
                    return Ok(Preparation::Skipped);
                }
                None => String::new(),
            },
            _ => String::new(),
        };

        let entries = compute_diff_with_limits(&old_content, &new_content, &self.config.diff_limits());
        if !DiffStats::from_entries(&entries).has_changes() {
            debug!("No textual changes in {}", changed.path);
            return Ok(Preparation::Skipped);
        }
        let diff_truncated = entries.iter().any(|e| e.text == TRUNCATION_MARKER);
        let diff = render_unified(&entries, self.config.diff_context_lines, self.config.max_diff_chars);

        let (system_prompt, user_prompt) = self.prompt_builder.build_prompt(&FileChange {
            file_path: &changed.path,
            change_kind: &changed.change_kind,
            commit_message: &commit.message,
            diff: &diff,
        })?;

        Ok(Preparation::Ready(PreparedFile {
            path: changed.path.clone(),
            change_kind: changed.change_kind.clone(),
            diff_truncated,
            system_prompt,
            user_prompt,
        }))
    }
}
