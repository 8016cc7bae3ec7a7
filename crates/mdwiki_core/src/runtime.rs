use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{WikiConfig, load_config};

pub const STATE_DIR_NAME: &str = ".mdwiki";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub doc_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub doc_dir: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub doc_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Layout rooted at `project_root` with every path at its default location.
    pub fn for_project(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        Self {
            doc_dir: project_root.join(crate::config::DEFAULT_DOC_DIR),
            config_path: state_dir.join(CONFIG_FILENAME),
            state_dir,
            project_root: project_root.to_path_buf(),
            root_source: ValueSource::Flag,
            doc_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\ndoc_dir={} ({})\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.doc_dir),
            self.doc_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub doc_dir_exists: bool,
    pub state_dir_exists: bool,
    pub config_exists: bool,
    pub repository_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let doc_dir_exists = paths.doc_dir.is_dir();
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();
    let repository_exists = paths.doc_dir.join(".git").exists();

    if paths.doc_dir.exists() && !doc_dir_exists {
        anyhow::bail!(
            "document root exists but is not a directory: {}",
            normalize_for_display(&paths.doc_dir)
        );
    }

    let mut warnings = Vec::new();
    if !doc_dir_exists {
        warnings.push(format!(
            "{} is missing; it is created on the first save or by `mdwiki init`",
            normalize_for_display(&paths.doc_dir)
        ));
    }
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `mdwiki init` to materialize the config"
        ));
    }
    if doc_dir_exists && !repository_exists {
        warnings.push(
            "document root is not a git repository yet; history starts with the next save"
                .to_string(),
        );
    }

    Ok(RuntimeStatus {
        project_root_exists,
        doc_dir_exists,
        state_dir_exists,
        config_exists,
        repository_exists,
        warnings,
    })
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<(ResolvedPaths, WikiConfig)> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<(ResolvedPaths, WikiConfig)>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("MDWIKI_CONFIG")) {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    let config = load_config(&config_path)
        .with_context(|| format!("failed to load config for {}", project_root.display()))?;

    let (doc_dir, doc_source) = if let Some(path) = overrides.doc_dir.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("MDWIKI_DOC_DIR")) {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else if let Some(value) = config.wiki.doc_dir.as_deref() {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Config,
        )
    } else {
        (
            project_root.join(crate::config::DEFAULT_DOC_DIR),
            ValueSource::Default,
        )
    };

    Ok((
        ResolvedPaths {
            project_root,
            doc_dir,
            state_dir,
            config_path,
            root_source,
            doc_source,
            config_source,
        },
        config,
    ))
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    for dir in [&paths.doc_dir, &paths.state_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let doc_dir = paths
        .doc_dir
        .strip_prefix(&paths.project_root)
        .map(normalize_for_display)
        .unwrap_or_else(|_| normalize_for_display(&paths.doc_dir));

    format!(
        "# mdwiki runtime configuration (materialized by `mdwiki init`)\n\n[wiki]\ndoc_dir = \"{doc_dir}\"\ndefault_page = \"index\"\nmarkdown_ext = \"markdown\"\nbase_url = \"/\"\n\n[versioning]\n# Set to false to keep pages unversioned even when git is installed.\nenabled = true\n# git_path = \"/usr/bin/git\"\ntimeout_ms = 10000\ncommitter_name = \"mdwiki\"\ncommitter_email = \"mdwiki@localhost\"\n",
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = non_empty(lookup_env("MDWIKI_PROJECT_ROOT")) {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref())
}

fn detect_project_root_heuristic(
    cwd: &Path,
    executable_dir: Option<&Path>,
) -> (PathBuf, ValueSource) {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(STATE_DIR_NAME).is_dir() {
            return (candidate, ValueSource::Heuristic);
        }
    }
    (cwd.to_path_buf(), ValueSource::Default)
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = cwd.ancestors().map(Path::to_path_buf).collect();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
