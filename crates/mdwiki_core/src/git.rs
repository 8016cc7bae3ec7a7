use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Result, WikiError};
use crate::process::{Deadline, ProcessError, ProcessOutput, run_with_timeout};
use crate::vcs::{
    AuthorIdentity, ChangeKind, CommitOutcome, Revision, VersionControl, validate_revision,
};

const FALLBACK_DIRS: &[&str] = &["/bin", "/usr/bin", "/usr/local/bin", "/sbin", "/usr/sbin"];
const LOG_FIELD_SEPARATOR: char = '\u{1f}';

static PROBED_GIT_BINARY: OnceLock<Option<PathBuf>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct GitOptions {
    pub binary: Option<PathBuf>,
    pub timeout: Duration,
    pub committer_name: String,
    pub committer_email: String,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            binary: None,
            timeout: Duration::from_millis(crate::config::DEFAULT_GIT_TIMEOUT_MS),
            committer_name: crate::config::DEFAULT_COMMITTER_NAME.to_string(),
            committer_email: crate::config::DEFAULT_COMMITTER_EMAIL.to_string(),
        }
    }
}

impl GitOptions {
    pub fn from_config(config: &crate::config::WikiConfig) -> Self {
        Self {
            binary: config.git_path(),
            timeout: Duration::from_millis(config.git_timeout_ms()),
            committer_name: config.committer_name().to_string(),
            committer_email: config.committer_email().to_string(),
        }
    }
}

/// `git` driven through argument vectors, rooted at the document directory.
#[derive(Debug, Clone)]
pub struct GitAdapter {
    binary: Option<PathBuf>,
    repo_root: PathBuf,
    options: GitOptions,
}

impl GitAdapter {
    pub fn new(repo_root: &Path, options: GitOptions) -> Self {
        let binary = options
            .binary
            .clone()
            .filter(|path| path.is_file())
            .or_else(find_git_binary);
        if binary.is_none() {
            log::debug!("git not found; page history is disabled");
        }
        Self {
            binary,
            repo_root: repo_root.to_path_buf(),
            options,
        }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    fn run(&self, operation: &str, args: Vec<OsString>, deadline: &Deadline) -> Result<ProcessOutput> {
        let Some(binary) = self.binary.as_deref() else {
            return Err(WikiError::vcs(operation, "git is not available"));
        };

        let mut command = Command::new(binary);
        command
            .args(&args)
            .current_dir(&self.repo_root)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", &self.options.committer_name)
            .env("GIT_AUTHOR_EMAIL", &self.options.committer_email)
            .env("GIT_COMMITTER_NAME", &self.options.committer_name)
            .env("GIT_COMMITTER_EMAIL", &self.options.committer_email);

        let timeout = deadline.bound(self.options.timeout);
        log::debug!("git {operation}: {:?} (timeout {timeout:?})", args);
        run_with_timeout(&mut command, timeout).map_err(|error| match error {
            ProcessError::TimedOut(limit) => {
                WikiError::vcs(operation, format!("timed out after {limit:?}"))
            }
            other => WikiError::vcs(operation, other.to_string()),
        })
    }

    fn run_checked(
        &self,
        operation: &str,
        args: Vec<OsString>,
        deadline: &Deadline,
    ) -> Result<ProcessOutput> {
        let output = self.run(operation, args, deadline)?;
        if output.success() {
            Ok(output)
        } else {
            Err(WikiError::vcs(operation, output.message()))
        }
    }

    fn relative_path(&self, path: &Path) -> Result<PathBuf> {
        let relative = path.strip_prefix(&self.repo_root).map_err(|_| {
            WikiError::vcs(
                "path",
                format!(
                    "{} is outside the repository at {}",
                    path.display(),
                    self.repo_root.display()
                ),
            )
        })?;
        Ok(relative.to_path_buf())
    }
}

impl VersionControl for GitAdapter {
    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    fn ensure_repository(&self, deadline: &Deadline) -> Result<()> {
        let inside = self.run(
            "status",
            args(["rev-parse", "--is-inside-work-tree"]),
            deadline,
        )?;
        if inside.success() && inside.stdout.trim() == "true" {
            return Ok(());
        }
        self.run_checked("init", args(["init", "--quiet"]), deadline)?;
        log::info!("initialized repository at {}", self.repo_root.display());
        Ok(())
    }

    fn commit(
        &self,
        path: &Path,
        action: ChangeKind,
        author: &AuthorIdentity,
        deadline: &Deadline,
    ) -> Result<CommitOutcome> {
        let relative = self.relative_path(path)?;

        let mut add_args = args(["add", "--all", "--"]);
        add_args.push(relative.clone().into_os_string());
        let added = self.run("add", add_args, deadline)?;
        if !added.success() {
            let message = added.message();
            if message.contains("did not match any files") {
                return Ok(CommitOutcome::NothingToCommit);
            }
            return Err(WikiError::vcs("add", message));
        }

        let mut staged_args = args(["diff", "--cached", "--quiet", "--"]);
        staged_args.push(relative.clone().into_os_string());
        let staged = self.run("diff", staged_args, deadline)?;
        if staged.success() {
            return Ok(CommitOutcome::NothingToCommit);
        }

        let summary = format!(
            "{} at {} by {author}",
            action.label(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let mut commit_args = args(["-c", "commit.gpgsign=false", "commit", "--quiet", "-m"]);
        commit_args.push(summary.into());
        commit_args.push("--".into());
        commit_args.push(relative.into_os_string());
        let committed = self.run("commit", commit_args, deadline)?;
        if committed.success() {
            return Ok(CommitOutcome::Committed);
        }
        let combined = format!("{}\n{}", committed.stdout, committed.stderr);
        if is_nothing_to_commit(&combined) {
            return Ok(CommitOutcome::NothingToCommit);
        }
        Err(WikiError::vcs("commit", committed.message()))
    }

    fn log(&self, path: &Path, deadline: &Deadline) -> Result<Vec<Revision>> {
        let relative = self.relative_path(path)?;
        let format = format!(
            "--pretty=format:%h{sep}%an{sep}%at{sep}%s",
            sep = "%x1f"
        );
        let mut log_args = args(["log", "--abbrev-commit", "--no-color"]);
        log_args.push(format.into());
        log_args.push("--".into());
        log_args.push(relative.into_os_string());

        let output = self.run("log", log_args, deadline)?;
        if !output.success() {
            let message = output.message();
            if message.contains("does not have any commits") {
                return Ok(Vec::new());
            }
            return Err(WikiError::vcs("log", message));
        }
        Ok(parse_log(&output.stdout))
    }

    fn diff(&self, path: &Path, from: &str, to: &str, deadline: &Deadline) -> Result<String> {
        let from = validate_revision(from)?;
        let to = validate_revision(to)?;
        let relative = self.relative_path(path)?;
        let mut diff_args = args(["diff", "--no-color", "--no-ext-diff", from, to, "--"]);
        diff_args.push(relative.into_os_string());
        let output = self.run_checked("diff", diff_args, deadline)?;
        Ok(strip_diff_header(&output.stdout))
    }

    fn show(&self, revision: &str, deadline: &Deadline) -> Result<String> {
        let revision = validate_revision(revision)?;
        let output = self.run_checked(
            "show",
            args(["log", "-1", "--no-color", "--format=medium", revision, "--"]),
            deadline,
        )?;
        Ok(output.stdout.trim_end().to_string())
    }
}

/// Locates `git`, probing `PATH` and then the usual system directories.
/// The lookup runs once per process.
pub fn find_git_binary() -> Option<PathBuf> {
    PROBED_GIT_BINARY
        .get_or_init(|| detect_git_binary(env::var("PATH").ok().as_deref()))
        .clone()
}

fn detect_git_binary(path_var: Option<&str>) -> Option<PathBuf> {
    let binary_name = if cfg!(windows) { "git.exe" } else { "git" };
    let separator = if cfg!(windows) { ';' } else { ':' };

    let path_dirs = path_var
        .unwrap_or_default()
        .split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from);
    let fallback_dirs = FALLBACK_DIRS.iter().map(PathBuf::from);

    path_dirs
        .chain(fallback_dirs)
        .map(|dir| dir.join(binary_name))
        .find(|candidate| candidate.is_file())
}

fn args<const N: usize>(values: [&str; N]) -> Vec<OsString> {
    values.into_iter().map(OsString::from).collect()
}

fn is_nothing_to_commit(output: &str) -> bool {
    output.contains("nothing to commit")
        || output.contains("nothing added to commit")
        || output.contains("no changes added to commit")
}

fn parse_log(stdout: &str) -> Vec<Revision> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.splitn(4, LOG_FIELD_SEPARATOR);
            let id = fields.next()?.trim().to_string();
            let author = fields.next()?.to_string();
            let timestamp = fields.next()?.trim().parse::<i64>().unwrap_or(0);
            let summary = fields.next().unwrap_or_default().to_string();
            if id.is_empty() {
                return None;
            }
            Some(Revision {
                id,
                author,
                timestamp,
                summary,
            })
        })
        .collect()
}

/// Drops the per-file header (`diff --git`, `index`, `---`, `+++` and any mode
/// lines) so only hunk markers and content lines remain.
pub fn strip_diff_header(raw: &str) -> String {
    raw.lines()
        .skip_while(|line| !line.starts_with("@@"))
        .collect::<Vec<_>>()
        .join("\n")
}
