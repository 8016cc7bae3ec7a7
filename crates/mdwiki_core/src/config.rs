use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use toml::Value;

pub const DEFAULT_PAGE: &str = "index";
pub const DEFAULT_MARKDOWN_EXT: &str = "markdown";
pub const DEFAULT_DOC_DIR: &str = "pages";
pub const DEFAULT_BASE_URL: &str = "/";
pub const DEFAULT_GIT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_COMMITTER_NAME: &str = "mdwiki";
pub const DEFAULT_COMMITTER_EMAIL: &str = "mdwiki@localhost";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub versioning: VersioningSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub doc_dir: Option<String>,
    pub default_page: Option<String>,
    pub markdown_ext: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct VersioningSection {
    pub enabled: Option<bool>,
    pub git_path: Option<String>,
    pub timeout_ms: Option<u64>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
}

impl WikiConfig {
    pub fn default_page(&self) -> &str {
        self.wiki
            .default_page
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_PAGE)
    }

    /// File extension without the leading dot.
    pub fn markdown_ext(&self) -> &str {
        self.wiki
            .markdown_ext
            .as_deref()
            .map(|value| value.trim_start_matches('.'))
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_MARKDOWN_EXT)
    }

    /// Base URL prefixed to page names; always ends with `/`.
    pub fn base_url(&self) -> String {
        let raw = env_override("MDWIKI_BASE_URL")
            .or_else(|| self.wiki.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if raw.ends_with('/') {
            raw
        } else {
            format!("{raw}/")
        }
    }

    pub fn versioning_enabled(&self) -> bool {
        self.versioning.enabled.unwrap_or(true)
    }

    /// Explicit git binary: env MDWIKI_GIT_PATH > config > None (search PATH).
    pub fn git_path(&self) -> Option<PathBuf> {
        env_override("MDWIKI_GIT_PATH")
            .or_else(|| self.versioning.git_path.clone())
            .map(PathBuf::from)
    }

    pub fn git_timeout_ms(&self) -> u64 {
        self.versioning
            .timeout_ms
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_GIT_TIMEOUT_MS)
    }

    pub fn committer_name(&self) -> &str {
        self.versioning
            .committer_name
            .as_deref()
            .unwrap_or(DEFAULT_COMMITTER_NAME)
    }

    pub fn committer_email(&self) -> &str {
        self.versioning
            .committer_email
            .as_deref()
            .unwrap_or(DEFAULT_COMMITTER_EMAIL)
    }
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    if let Some(page) = parsed.wiki.default_page.as_deref()
        && crate::page::PageName::parse(page).is_err()
    {
        bail!(
            "default_page '{page}' in {} is not a valid page name",
            config_path.display()
        );
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct WikiConfigPatch {
    pub set_base_url: Option<String>,
    pub set_default_page: Option<String>,
}

/// Update selected keys under `[wiki]` while preserving all other config sections.
/// Returns `true` when a write occurred.
pub fn patch_wiki_config(config_path: &Path, patch: &WikiConfigPatch) -> Result<bool> {
    if patch.set_base_url.is_none() && patch.set_default_page.is_none() {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    let wiki_entry = root_table
        .entry("wiki".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let wiki_table = wiki_entry
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[wiki] must be a table in {}", config_path.display()))?;

    if let Some(base_url) = &patch.set_base_url {
        wiki_table.insert("base_url".to_string(), Value::String(base_url.clone()));
    }
    if let Some(default_page) = &patch.set_default_page {
        if crate::page::PageName::parse(default_page).is_err() {
            bail!("default page '{default_page}' is not a valid page name");
        }
        wiki_table.insert(
            "default_page".to_string(),
            Value::String(default_page.clone()),
        );
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_builtin_values() {
        let config = WikiConfig::default();
        assert_eq!(config.default_page(), "index");
        assert_eq!(config.markdown_ext(), "markdown");
        assert!(config.versioning_enabled());
        assert_eq!(config.git_timeout_ms(), DEFAULT_GIT_TIMEOUT_MS);
        assert_eq!(config.committer_name(), "mdwiki");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert!(config.wiki.doc_dir.is_none());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
doc_dir = "docs"
default_page = "home"
markdown_ext = ".md"
base_url = "/wiki"

[versioning]
enabled = false
timeout_ms = 2500
committer_name = "robot"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.wiki.doc_dir.as_deref(), Some("docs"));
        assert_eq!(config.default_page(), "home");
        assert_eq!(config.markdown_ext(), "md");
        assert_eq!(config.wiki.base_url.as_deref(), Some("/wiki"));
        assert!(!config.versioning_enabled());
        assert_eq!(config.git_timeout_ms(), 2500);
        assert_eq!(config.committer_name(), "robot");
        assert_eq!(config.committer_email(), DEFAULT_COMMITTER_EMAIL);
    }

    #[test]
    fn load_config_rejects_invalid_default_page() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki]\ndefault_page = \"../etc\"\n").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("not a valid page name"));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\nbase_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn patch_wiki_config_preserves_other_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[versioning]\ntimeout_ms = 500\n").expect("write config");

        let wrote = patch_wiki_config(
            &config_path,
            &WikiConfigPatch {
                set_base_url: Some("/w/".to_string()),
                set_default_page: Some("start".to_string()),
            },
        )
        .expect("patch");
        assert!(wrote);

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.wiki.base_url.as_deref(), Some("/w/"));
        assert_eq!(config.default_page(), "start");
        assert_eq!(config.git_timeout_ms(), 500);

        let unchanged = patch_wiki_config(
            &config_path,
            &WikiConfigPatch {
                set_base_url: Some("/w/".to_string()),
                set_default_page: None,
            },
        )
        .expect("patch");
        assert!(!unchanged);
    }
}
