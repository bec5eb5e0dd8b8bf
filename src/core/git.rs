use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, Delta, DiffFindOptions, DiffOptions, ErrorCode, Repository, Sort};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: String,
    pub short_id: String,
    pub author: String,
    pub email: String,
    pub time: DateTime<Utc>,
    /// First line of the commit message.
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    pub path: String,
    pub change_kind: ChangeKind,
}

/// Read access to file versions, keyed by revision id.
pub trait RevisionSource {
    /// `None` when the path does not exist at `revision` or is not text.
    fn file_content_at_revision(&self, revision: &str, path: &str) -> Result<Option<String>>;
    fn changed_paths(&self, revision: &str) -> Result<Vec<ChangedPath>>;
    /// First parent, `None` for a root commit.
    fn parent_revision(&self, revision: &str) -> Result<Option<String>>;
}

pub struct GitIntegration {
    repo: Repository,
}

impl GitIntegration {
    pub fn new(repo_path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::discover(repo_path).context("Failed to find git repository")?;
        Ok(Self { repo })
    }

    /// Commits reachable from `branch` (HEAD when `None`) whose commit time
    /// falls inside `[since, until]`, oldest first.
    pub fn commits_in_window(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        branch: Option<&str>,
    ) -> Result<Vec<CommitInfo>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;

        match branch {
            Some(branch) => {
                let tip = self
                    .repo
                    .revparse_single(branch)
                    .and_then(|obj| obj.peel_to_commit())
                    .with_context(|| format!("Failed to resolve branch '{}'", branch))?;
                revwalk.push(tip.id())?;
            }
            None => revwalk.push_head().context("Repository has no HEAD commit")?,
        }

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            let info = commit_info(&commit);

            if until.is_some_and(|until| info.time > until) {
                continue;
            }
            if since.is_some_and(|since| info.time < since) {
                break;
            }
            commits.push(info);
        }

        commits.reverse();
        debug!("Found {} commits in window", commits.len());
        Ok(commits)
    }

    fn find_commit(&self, revision: &str) -> Result<Commit<'_>> {
        self.repo
            .revparse_single(revision)
            .and_then(|obj| obj.peel_to_commit())
            .with_context(|| format!("Failed to resolve revision '{}'", revision))
    }
}

impl RevisionSource for GitIntegration {
    fn file_content_at_revision(&self, revision: &str, path: &str) -> Result<Option<String>> {
        let tree = self.find_commit(revision)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(anyhow::Error::new(e).context(format!("Failed to look up {}", path))),
        };

        let Ok(blob) = entry.to_object(&self.repo)?.peel_to_blob() else {
            return Ok(None);
        };
        if blob.is_binary() {
            debug!("Skipping binary blob {} at {}", path, revision);
            return Ok(None);
        }

        Ok(String::from_utf8(blob.content().to_vec()).ok())
    }

    fn changed_paths(&self, revision: &str) -> Result<Vec<ChangedPath>> {
        let commit = self.find_commit(revision)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };

        let mut diff_opts = DiffOptions::new();
        let mut diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts))
            .with_context(|| format!("Failed to diff {} against its parent", revision))?;

        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        let changes = diff
            .deltas()
            .filter_map(|delta| {
                let (path, change_kind) = match delta.status() {
                    Delta::Added | Delta::Copied => (path_of(delta.new_file()), ChangeKind::Added),
                    Delta::Modified | Delta::Typechange => {
                        (path_of(delta.new_file()), ChangeKind::Modified)
                    }
                    Delta::Deleted => (path_of(delta.old_file()), ChangeKind::Deleted),
                    Delta::Renamed => (
                        path_of(delta.new_file()),
                        ChangeKind::Renamed {
                            from: path_of(delta.old_file()),
                        },
                    ),
                    _ => return None,
                };
                (!path.is_empty()).then_some(ChangedPath { path, change_kind })
            })
            .collect();

        Ok(changes)
    }

    fn parent_revision(&self, revision: &str) -> Result<Option<String>> {
        let commit = self.find_commit(revision)?;
        Ok(commit.parent_ids().next().map(|id| id.to_string()))
    }
}

fn path_of(file: git2::DiffFile<'_>) -> String {
    file.path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn commit_info(commit: &Commit<'_>) -> CommitInfo {
    let id = commit.id().to_string();
    let author = commit.author();
    let time = Utc
        .timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_default();

    CommitInfo {
        short_id: id[..id.len().min(8)].to_string(),
        id,
        author: author.name().unwrap_or("unknown").to_string(),
        email: author.email().unwrap_or("unknown").to_string(),
        time,
        message: commit.summary().unwrap_or("").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Oid, Signature, Time};
    use tempfile::TempDir;

    struct TestRepo {
        repo: Repository,
        dir: TempDir,
    }

    impl TestRepo {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let repo = Repository::init(dir.path()).unwrap();
            Self { repo, dir }
        }

        /// `None` content deletes the file.
        fn commit(&self, files: &[(&str, Option<&str>)], message: &str, time: i64) -> Oid {
            let mut index = self.repo.index().unwrap();
            for (path, content) in files {
                let full = self.dir.path().join(path);
                match content {
                    Some(content) => {
                        std::fs::write(&full, content).unwrap();
                        index.add_path(Path::new(path)).unwrap();
                    }
                    None => {
                        std::fs::remove_file(&full).unwrap();
                        index.remove_path(Path::new(path)).unwrap();
                    }
                }
            }
            index.write().unwrap();

            let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::new("Alice", "alice@example.com", &Time::new(time, 0)).unwrap();
            let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&Commit> = parent.iter().collect();
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
                .unwrap()
        }

        fn git(&self) -> GitIntegration {
            GitIntegration::new(self.dir.path()).unwrap()
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn reads_file_content_at_revision() {
        let repo = TestRepo::new();
        let first = repo.commit(&[("a.txt", Some("one\n"))], "first", 1_000);
        let second = repo.commit(&[("a.txt", Some("two\n"))], "second", 2_000);
        let git = repo.git();

        assert_eq!(
            git.file_content_at_revision(&first.to_string(), "a.txt").unwrap().as_deref(),
            Some("one\n")
        );
        assert_eq!(
            git.file_content_at_revision(&second.to_string(), "a.txt").unwrap().as_deref(),
            Some("two\n")
        );
        assert_eq!(git.file_content_at_revision("HEAD", "missing.txt").unwrap(), None);
    }

    #[test]
    fn binary_blobs_have_no_text() {
        let repo = TestRepo::new();
        repo.commit(&[("logo.bin", Some("PNG\0\0\u{1}data"))], "binary", 1_000);
        assert_eq!(repo.git().file_content_at_revision("HEAD", "logo.bin").unwrap(), None);
    }

    #[test]
    fn classifies_changed_paths() {
        let repo = TestRepo::new();
        repo.commit(
            &[
                ("keep.txt", Some("keep\n")),
                ("old.txt", Some("same content for rename detection\n")),
                ("gone.txt", Some("bye\n")),
            ],
            "initial",
            1_000,
        );
        repo.commit(
            &[
                ("keep.txt", Some("changed\n")),
                ("old.txt", None),
                ("new.txt", Some("same content for rename detection\n")),
                ("gone.txt", None),
                ("added.txt", Some("hi\n")),
            ],
            "change everything",
            2_000,
        );

        let mut changes = repo.git().changed_paths("HEAD").unwrap();
        changes.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(
            changes,
            vec![
                ChangedPath { path: "added.txt".into(), change_kind: ChangeKind::Added },
                ChangedPath { path: "gone.txt".into(), change_kind: ChangeKind::Deleted },
                ChangedPath { path: "keep.txt".into(), change_kind: ChangeKind::Modified },
                ChangedPath {
                    path: "new.txt".into(),
                    change_kind: ChangeKind::Renamed { from: "old.txt".into() },
                },
            ]
        );
    }

    #[test]
    fn root_commit_lists_everything_as_added() {
        let repo = TestRepo::new();
        let root = repo.commit(&[("a.txt", Some("a\n"))], "root", 1_000);
        let git = repo.git();

        let changes = git.changed_paths(&root.to_string()).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_kind, ChangeKind::Added);
        assert_eq!(git.parent_revision(&root.to_string()).unwrap(), None);
    }

    #[test]
    fn parent_revision_is_first_parent() {
        let repo = TestRepo::new();
        let first = repo.commit(&[("a.txt", Some("a\n"))], "first", 1_000);
        repo.commit(&[("a.txt", Some("b\n"))], "second", 2_000);

        assert_eq!(
            repo.git().parent_revision("HEAD").unwrap(),
            Some(first.to_string())
        );
    }

    #[test]
    fn commits_in_window_are_oldest_first() {
        let repo = TestRepo::new();
        repo.commit(&[("a.txt", Some("1\n"))], "one", 1_000);
        repo.commit(&[("a.txt", Some("2\n"))], "two\n\nbody text", 2_000);
        repo.commit(&[("a.txt", Some("3\n"))], "three", 3_000);
        let git = repo.git();

        let all = git.commits_in_window(None, None, None).unwrap();
        let messages: Vec<&str> = all.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
        assert_eq!(all[0].author, "Alice");
        assert_eq!(all[0].short_id.len(), 8);
        assert_eq!(all[0].time, at(1_000));

        let window = git
            .commits_in_window(Some(at(1_500)), Some(at(2_500)), None)
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].message, "two");
    }

    #[test]
    fn unknown_revision_is_an_error() {
        let repo = TestRepo::new();
        repo.commit(&[("a.txt", Some("a\n"))], "first", 1_000);
        assert!(repo.git().changed_paths("no-such-branch").is_err());
        assert!(repo.git().commits_in_window(None, None, Some("no-such-branch")).is_err());
    }
}
