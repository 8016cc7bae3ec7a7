use serde::Serialize;

use crate::page::{PageName, is_valid_page_name};
use crate::store::PageStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLink {
    pub is_unresolved: bool,
    pub target_url: String,
}

/// Maps raw link destinations found in page markdown to wiki URLs.
#[derive(Clone, Copy)]
pub struct WikiLinkResolver<'a> {
    base_url: &'a str,
    store: &'a PageStore,
}

impl<'a> WikiLinkResolver<'a> {
    pub fn new(base_url: &'a str, store: &'a PageStore) -> Self {
        Self { base_url, store }
    }

    /// Internal page names become `base_url + name` and are flagged when the
    /// page is missing. Other tokens pass through untouched.
    pub fn resolve(&self, token: &str) -> ResolvedLink {
        match self.internal_target(token) {
            Some(name) => ResolvedLink {
                is_unresolved: !self.store.exists(&name),
                target_url: format!("{}{}", self.base_url, name),
            },
            None => ResolvedLink {
                is_unresolved: false,
                target_url: token.to_string(),
            },
        }
    }

    fn internal_target(&self, token: &str) -> Option<PageName> {
        if token == "/" {
            return PageName::parse(self.store.default_page()).ok();
        }
        let candidate = token.strip_prefix('/').unwrap_or(token);
        if is_valid_page_name(candidate) {
            PageName::parse(candidate).ok()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::WikiLinkResolver;
    use crate::page::PageName;
    use crate::process::Deadline;
    use crate::store::PageStore;
    use crate::vcs::{AuthorIdentity, NoVersionControl};

    fn seeded_store(root: &std::path::Path) -> PageStore {
        let store = PageStore::new(root, "markdown", "index", Arc::new(NoVersionControl));
        for name in ["foo/bar", "index"] {
            store
                .write(
                    &PageName::parse(name).expect("name"),
                    "body",
                    &AuthorIdentity::default(),
                    &Deadline::unbounded(),
                )
                .expect("seed page");
        }
        store
    }

    #[test]
    fn existing_page_resolves_under_base_url() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let resolver = WikiLinkResolver::new("/wiki/", &store);

        let link = resolver.resolve("foo/bar");
        assert!(!link.is_unresolved);
        assert_eq!(link.target_url, "/wiki/foo/bar");

        let rooted = resolver.resolve("/foo/bar");
        assert_eq!(rooted, link);
    }

    #[test]
    fn missing_page_is_flagged() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let link = WikiLinkResolver::new("/", &store).resolve("not-yet-written");
        assert!(link.is_unresolved);
        assert_eq!(link.target_url, "/not-yet-written");
    }

    #[test]
    fn slash_resolves_to_default_page() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let link = WikiLinkResolver::new("/", &store).resolve("/");
        assert!(!link.is_unresolved);
        assert_eq!(link.target_url, "/index");
    }

    #[test]
    fn external_and_malformed_tokens_pass_through() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let resolver = WikiLinkResolver::new("/", &store);
        for token in ["http://example.com", "mailto:a@b.c", "#section", "foo.png", "../up"] {
            let link = resolver.resolve(token);
            assert!(!link.is_unresolved, "{token}");
            assert_eq!(link.target_url, token);
        }
    }
}
