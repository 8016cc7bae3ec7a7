use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::WikiConfig;
use crate::error::{Result, WikiError};
use crate::git::{GitAdapter, GitOptions};
use crate::notice::Notice;
use crate::page::{EditToken, Page, PageName};
use crate::process::Deadline;
use crate::runtime::ResolvedPaths;
use crate::vcs::{
    AuthorIdentity, ChangeKind, CommitOutcome, NoVersionControl, VersionControl, record_change,
};

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub page: Page,
    pub created: bool,
    pub commit: CommitOutcome,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub name: PageName,
    pub removed: bool,
    pub commit: CommitOutcome,
    pub notices: Vec<Notice>,
}

/// Markdown pages stored as `<doc_dir>/<name>.<extension>`.
#[derive(Clone)]
pub struct PageStore {
    doc_dir: PathBuf,
    extension: String,
    default_page: String,
    vcs: Arc<dyn VersionControl>,
}

impl PageStore {
    pub fn new(
        doc_dir: impl Into<PathBuf>,
        extension: &str,
        default_page: &str,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        Self {
            doc_dir: doc_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            default_page: default_page.to_string(),
            vcs,
        }
    }

    /// Store wired to git when it is installed and versioning is enabled.
    pub fn open(paths: &ResolvedPaths, config: &WikiConfig) -> Self {
        let vcs: Arc<dyn VersionControl> = if config.versioning_enabled() {
            Arc::new(GitAdapter::new(
                &paths.doc_dir,
                GitOptions::from_config(config),
            ))
        } else {
            Arc::new(NoVersionControl)
        };
        Self::new(
            &paths.doc_dir,
            config.markdown_ext(),
            config.default_page(),
            vcs,
        )
    }

    pub fn doc_dir(&self) -> &Path {
        &self.doc_dir
    }

    pub fn default_page(&self) -> &str {
        &self.default_page
    }

    pub fn vcs(&self) -> &dyn VersionControl {
        self.vcs.as_ref()
    }

    /// Page named by a request path, substituting the default page for roots.
    pub fn page_name(&self, raw: &str) -> Result<PageName> {
        PageName::from_request(raw, &self.default_page)
    }

    /// File backing `name`; fails with `InvalidName` outside the grammar.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        PageName::parse(name).map(|name| self.path_for(&name))
    }

    pub fn path_for(&self, name: &PageName) -> PathBuf {
        let mut path = self.doc_dir.clone();
        for segment in name.as_str().split('/') {
            path.push(segment);
        }
        path.set_extension(&self.extension);
        path
    }

    pub fn exists(&self, name: &PageName) -> bool {
        self.path_for(name).is_file()
    }

    /// Reads a page. A missing file is a new page, not an error. Bytes that
    /// are not UTF-8 are replaced so the page can still be edited.
    pub fn read(&self, name: &PageName) -> Result<Page> {
        let path = self.path_for(name);
        let content = match fs::read(&path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(error) => {
                    log::warn!("{} is not valid UTF-8; invalid bytes replaced", path.display());
                    String::from_utf8_lossy(error.as_bytes()).into_owned()
                }
            },
            Err(error) if is_absent(&error) => {
                return Ok(Page::missing(name.clone()));
            }
            Err(error) => return Err(WikiError::storage(path, error)),
        };
        let last_modified =
            modified_unix_seconds(&path).map_err(|error| WikiError::storage(&path, error))?;
        Ok(Page {
            name: name.clone(),
            token: EditToken::for_content(&content),
            content,
            last_modified,
            exists: true,
        })
    }

    /// Persists `content` and records a version when version control is
    /// available. Versioning problems come back as notices.
    pub fn write(
        &self,
        name: &PageName,
        content: &str,
        author: &AuthorIdentity,
        deadline: &Deadline,
    ) -> Result<WriteOutcome> {
        let path = self.path_for(name);
        let created = !path.is_file();
        write_atomically(&path, content)?;
        let last_modified =
            modified_unix_seconds(&path).map_err(|error| WikiError::storage(&path, error))?;
        log::debug!("wrote {} ({} bytes)", path.display(), content.len());

        let (commit, notices) =
            record_change(self.vcs(), &path, ChangeKind::Change, author, deadline);

        Ok(WriteOutcome {
            page: Page {
                name: name.clone(),
                content: content.to_string(),
                last_modified,
                token: EditToken::for_content(content),
                exists: true,
            },
            created,
            commit,
            notices,
        })
    }

    /// Removes the backing file. Deleting a missing page succeeds.
    pub fn delete(
        &self,
        name: &PageName,
        author: &AuthorIdentity,
        deadline: &Deadline,
    ) -> Result<DeleteOutcome> {
        let path = self.path_for(name);
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(error) if is_absent(&error) => false,
            Err(error) => return Err(WikiError::storage(path, error)),
        };

        let (commit, notices) = if removed {
            record_change(self.vcs(), &path, ChangeKind::Deletion, author, deadline)
        } else {
            (CommitOutcome::Skipped, Vec::new())
        };

        Ok(DeleteOutcome {
            name: name.clone(),
            removed,
            commit,
            notices,
        })
    }

    /// Every page under the document root, sorted by name.
    pub fn list_pages(&self) -> Result<Vec<PageName>> {
        if !self.doc_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut pages = Vec::new();
        let walker = WalkDir::new(&self.doc_dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            });
        for entry in walker {
            let entry = entry.map_err(|error| {
                let path = error
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.doc_dir.clone());
                WikiError::storage(path, io::Error::other(error.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = self.page_name_for_path(entry.path()) {
                pages.push(name);
            }
        }
        pages.sort();
        Ok(pages)
    }

    fn page_name_for_path(&self, path: &Path) -> Option<PageName> {
        if path.extension()?.to_str()? != self.extension {
            return None;
        }
        let relative = path.strip_prefix(&self.doc_dir).ok()?.with_extension("");
        let name = relative.to_string_lossy().replace('\\', "/");
        PageName::parse(&name).ok()
    }
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| WikiError::storage(path, io::Error::other("path has no parent")))?;
    fs::create_dir_all(parent).map_err(|error| WikiError::storage(parent, error))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
    if let Err(error) = fs::write(&staging, content) {
        let _ = fs::remove_file(&staging);
        return Err(WikiError::storage(path, error));
    }
    if let Err(error) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(WikiError::storage(path, error));
    }
    Ok(())
}

/// A file under a path component that is not a directory cannot exist either.
fn is_absent(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn modified_unix_seconds(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}
