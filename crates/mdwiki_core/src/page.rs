use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, WikiError};

static PAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9-]+(/[a-z0-9-]+)*$").expect("valid page name regex")
});

/// Returns `true` when `value` satisfies the page-name grammar.
pub fn is_valid_page_name(value: &str) -> bool {
    PAGE_NAME_RE.is_match(value)
}

/// A validated page name: letters, digits and hyphens in `/`-separated segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PageName(String);

impl PageName {
    pub fn parse(value: &str) -> Result<Self> {
        if is_valid_page_name(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(WikiError::InvalidName(value.to_string()))
        }
    }

    /// Page named by a request path. An empty path or one ending in `/`
    /// denotes a directory root and gets `default_page` appended.
    pub fn from_request(raw: &str, default_page: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_start_matches('/');
        if trimmed.is_empty() || trimmed.ends_with('/') {
            return Self::parse(&format!("{trimmed}{default_page}"));
        }
        Self::parse(trimmed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human title: runs of `-`, `_`, `.` and whitespace become one space and
    /// each word is capitalised.
    pub fn display_title(&self) -> String {
        display_title(&self.0)
    }
}

impl fmt::Display for PageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn display_title(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;
    let mut pending_space = false;
    for ch in value.chars() {
        if matches!(ch, '-' | '_' | '.') || ch.is_whitespace() {
            pending_space = !out.is_empty();
            at_word_start = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.push(ch);
        }
        if ch == '/' {
            at_word_start = true;
        }
    }
    out
}

/// Concurrency marker handed out with an edit form and checked on save.
///
/// The token fingerprints the stored content, so two saves within the same
/// second are still told apart. A page that does not exist has the empty token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditToken(String);

impl EditToken {
    pub fn for_content(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        let mut output = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            output.push_str(&format!("{byte:02x}"));
        }
        Self(output)
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EditToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub name: PageName,
    pub content: String,
    /// Modification time in unix seconds; 0 when the page does not exist.
    pub last_modified: u64,
    pub token: EditToken,
    pub exists: bool,
}

impl Page {
    pub fn missing(name: PageName) -> Self {
        Self {
            name,
            content: String::new(),
            last_modified: 0,
            token: EditToken::default(),
            exists: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EditToken, PageName, display_title, is_valid_page_name};

    #[test]
    fn grammar_accepts_segmented_names() {
        for name in ["index", "foo/bar", "Foo-Bar/2024", "a/b/c-d"] {
            assert!(is_valid_page_name(name), "expected valid: {name}");
        }
    }

    #[test]
    fn grammar_rejects_traversal_and_punctuation() {
        for name in [
            "", "/", "foo/", "/foo", "../etc", "foo//bar", "foo bar", "foo.md", "foo_bar",
            "http://example.com",
        ] {
            assert!(!is_valid_page_name(name), "expected invalid: {name}");
        }
    }

    #[test]
    fn from_request_substitutes_default_page_for_roots() {
        assert_eq!(
            PageName::from_request("", "index").expect("root").as_str(),
            "index"
        );
        assert_eq!(
            PageName::from_request("/", "index").expect("slash").as_str(),
            "index"
        );
        assert_eq!(
            PageName::from_request("docs/", "index").expect("dir").as_str(),
            "docs/index"
        );
        assert_eq!(
            PageName::from_request("/docs/setup", "index")
                .expect("page")
                .as_str(),
            "docs/setup"
        );
        let error = PageName::from_request("docs/../x", "index").expect_err("must fail");
        assert_eq!(error.kind(), "invalid_name");
    }

    #[test]
    fn display_title_capitalises_words() {
        assert_eq!(display_title("getting-started"), "Getting Started");
        assert_eq!(display_title("docs/how_to.use"), "Docs/How To Use");
        assert_eq!(display_title("index"), "Index");
    }

    #[test]
    fn token_fingerprints_content() {
        let first = EditToken::for_content("alpha");
        assert_eq!(first, EditToken::for_content("alpha"));
        assert_ne!(first, EditToken::for_content("alpha "));
        assert_eq!(first.as_str().len(), 16);
        assert!(EditToken::default().is_empty());
        assert_eq!(EditToken::new("  abc \n").as_str(), "abc");
    }
}
