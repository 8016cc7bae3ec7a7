use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::{Result, WikiError};
use crate::notice::Notice;
use crate::process::Deadline;

/// One commit touching a page, as reported by the version control log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    /// Abbreviated commit identifier.
    pub id: String,
    pub author: String,
    /// Commit time in unix seconds.
    pub timestamp: i64,
    pub summary: String,
}

impl Revision {
    /// The `<id> <summary>` form used by one-line logs.
    pub fn oneline(&self) -> String {
        format!("{} {}", self.id, self.summary)
    }
}

/// Who caused a change: the request origin address plus an optional user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorIdentity {
    pub address: String,
    pub user: Option<String>,
}

impl AuthorIdentity {
    pub fn new(address: impl Into<String>, user: Option<String>) -> Self {
        Self {
            address: address.into().trim().to_string(),
            user: user
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }
}

impl fmt::Display for AuthorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = if self.address.is_empty() {
            "unknown"
        } else {
            self.address.as_str()
        };
        match &self.user {
            Some(user) => write!(f, "{user} ({address})"),
            None => f.write_str(address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
    Skipped,
}

/// Narrow interface over the external versioning tool. Every call may shell
/// out and must respect `deadline`.
pub trait VersionControl: Send + Sync {
    fn is_available(&self) -> bool;

    /// Initialises a repository at the document root unless one exists.
    fn ensure_repository(&self, deadline: &Deadline) -> Result<()>;

    /// Stages the current state of `path` (including removal) and commits it.
    fn commit(
        &self,
        path: &Path,
        action: ChangeKind,
        author: &AuthorIdentity,
        deadline: &Deadline,
    ) -> Result<CommitOutcome>;

    /// Revisions touching `path`, most recent first.
    fn log(&self, path: &Path, deadline: &Deadline) -> Result<Vec<Revision>>;

    /// Diff of `path` between two revisions with the file header removed.
    fn diff(&self, path: &Path, from: &str, to: &str, deadline: &Deadline) -> Result<String>;

    /// Author, date and message of a single revision.
    fn show(&self, revision: &str, deadline: &Deadline) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Change,
    Deletion,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Change => "Change",
            Self::Deletion => "Deletion",
        }
    }
}

/// Adapter used when git is missing or versioning is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVersionControl;

impl VersionControl for NoVersionControl {
    fn is_available(&self) -> bool {
        false
    }

    fn ensure_repository(&self, _deadline: &Deadline) -> Result<()> {
        Ok(())
    }

    fn commit(
        &self,
        _path: &Path,
        _action: ChangeKind,
        _author: &AuthorIdentity,
        _deadline: &Deadline,
    ) -> Result<CommitOutcome> {
        Ok(CommitOutcome::Skipped)
    }

    fn log(&self, _path: &Path, _deadline: &Deadline) -> Result<Vec<Revision>> {
        Ok(Vec::new())
    }

    fn diff(&self, _path: &Path, _from: &str, _to: &str, _deadline: &Deadline) -> Result<String> {
        Ok(String::new())
    }

    fn show(&self, _revision: &str, _deadline: &Deadline) -> Result<String> {
        Ok(String::new())
    }
}

/// Runs the ensure-repository + commit sequence after a successful write.
/// Failures never propagate: they are logged and returned as warnings.
pub fn record_change(
    vcs: &dyn VersionControl,
    path: &Path,
    action: ChangeKind,
    author: &AuthorIdentity,
    deadline: &Deadline,
) -> (CommitOutcome, Vec<Notice>) {
    if !vcs.is_available() {
        return (CommitOutcome::Skipped, Vec::new());
    }

    if let Err(error) = vcs.ensure_repository(deadline) {
        log::warn!("versioning skipped for {}: {error}", path.display());
        return (
            CommitOutcome::Skipped,
            vec![Notice::warning(format!(
                "The page was saved, but no version was recorded: {error}"
            ))],
        );
    }

    match vcs.commit(path, action, author, deadline) {
        Ok(outcome) => {
            log::info!("{} of {} recorded: {outcome:?}", action.label(), path.display());
            (outcome, Vec::new())
        }
        Err(error) => {
            log::warn!("commit failed for {}: {error}", path.display());
            (
                CommitOutcome::Skipped,
                vec![Notice::warning(format!(
                    "The page was saved, but no version was recorded: {error}"
                ))],
            )
        }
    }
}

/// Accepts commit ids and simple revision expressions; rejects anything that
/// could be read as an option or carries whitespace.
pub fn validate_revision(revision: &str) -> Result<&str> {
    let trimmed = revision.trim();
    let valid = !trimmed.is_empty()
        && !trimmed.starts_with('-')
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '~' | '^' | '/' | '-'));
    if valid {
        Ok(trimmed)
    } else {
        Err(WikiError::InvalidRevision(revision.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;

    struct FailingCommit {
        commits: Mutex<usize>,
    }

    impl VersionControl for FailingCommit {
        fn is_available(&self) -> bool {
            true
        }

        fn ensure_repository(&self, _deadline: &Deadline) -> Result<()> {
            Ok(())
        }

        fn commit(
            &self,
            _path: &Path,
            _action: ChangeKind,
            _author: &AuthorIdentity,
            _deadline: &Deadline,
        ) -> Result<CommitOutcome> {
            *self.commits.lock().expect("lock") += 1;
            Err(WikiError::vcs("commit", "index.lock exists"))
        }

        fn log(&self, _path: &Path, _deadline: &Deadline) -> Result<Vec<Revision>> {
            Ok(Vec::new())
        }

        fn diff(&self, _: &Path, _: &str, _: &str, _: &Deadline) -> Result<String> {
            Ok(String::new())
        }

        fn show(&self, _revision: &str, _deadline: &Deadline) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn author_identity_prefers_user_with_address() {
        let with_user = AuthorIdentity::new(" 10.0.0.7 ", Some("alice".to_string()));
        assert_eq!(with_user.to_string(), "alice (10.0.0.7)");
        let address_only = AuthorIdentity::new("10.0.0.7", Some("  ".to_string()));
        assert_eq!(address_only.to_string(), "10.0.0.7");
        assert_eq!(AuthorIdentity::default().to_string(), "unknown");
    }

    #[test]
    fn record_change_downgrades_commit_failure_to_warning() {
        let vcs = FailingCommit {
            commits: Mutex::new(0),
        };
        let (outcome, notices) = record_change(
            &vcs,
            Path::new("/tmp/page.markdown"),
            ChangeKind::Change,
            &AuthorIdentity::new("127.0.0.1", None),
            &Deadline::unbounded(),
        );
        assert_eq!(outcome, CommitOutcome::Skipped);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, crate::notice::Severity::Warning);
        assert_eq!(*vcs.commits.lock().expect("lock"), 1);
    }

    #[test]
    fn record_change_is_silent_without_version_control() {
        let (outcome, notices) = record_change(
            &NoVersionControl,
            Path::new("/tmp/page.markdown"),
            ChangeKind::Change,
            &AuthorIdentity::default(),
            &Deadline::unbounded(),
        );
        assert_eq!(outcome, CommitOutcome::Skipped);
        assert!(notices.is_empty());
    }

    #[test]
    fn validate_revision_rejects_option_like_input() {
        assert_eq!(validate_revision(" a1b2c3d ").expect("id"), "a1b2c3d");
        assert_eq!(validate_revision("HEAD~1").expect("expr"), "HEAD~1");
        for bad in ["", "--output=/etc/passwd", "-p", "a b", "a;rm", "$(x)"] {
            assert!(validate_revision(bad).is_err(), "expected rejection: {bad}");
        }
    }
}
