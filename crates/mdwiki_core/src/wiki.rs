use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::DateTime;
use serde::Serialize;

use crate::changelog::{Changelog, ChangelogEntry, build_changelog, escape_html, render_diff_html};
use crate::config::WikiConfig;
use crate::conflict;
use crate::error::{Result, WikiError};
use crate::links::WikiLinkResolver;
use crate::notice::Notice;
use crate::page::{EditToken, PageName};
use crate::process::Deadline;
use crate::render::render_markdown;
use crate::runtime::ResolvedPaths;
use crate::store::PageStore;
use crate::vcs::AuthorIdentity;

/// Per-request inputs that used to live in ambient server state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub remote_addr: String,
    pub remote_user: Option<String>,
    pub deadline: Deadline,
}

impl RequestContext {
    pub fn new(remote_addr: impl Into<String>, remote_user: Option<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            remote_user,
            deadline: Deadline::unbounded(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn author(&self) -> AuthorIdentity {
        AuthorIdentity::new(self.remote_addr.clone(), self.remote_user.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Display,
    Edit,
    Preview { text: String, token: EditToken },
    Save { text: String, token: EditToken },
    Changelog { from: Option<String>, to: Option<String> },
    Delete,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Edit => "edit",
            Self::Preview { .. } => "preview",
            Self::Save { .. } => "save",
            Self::Changelog { .. } => "changelog",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditForm {
    pub text: String,
    pub token: EditToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageOption {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub page: PageName,
    pub title: String,
    pub body: String,
    pub edit_form: Option<EditForm>,
    pub changelog: Option<Changelog>,
    pub options: Vec<PageOption>,
    pub notices: Vec<Notice>,
    pub redirect: Option<String>,
}

impl Response {
    fn new(page: &PageName, title: String) -> Self {
        Self {
            page: page.clone(),
            title,
            body: String::new(),
            edit_form: None,
            changelog: None,
            options: Vec::new(),
            notices: Vec::new(),
            redirect: None,
        }
    }
}

/// Entry point for page actions. Saves and deletes of the same page are
/// serialised through a per-page lock.
pub struct Wiki {
    store: PageStore,
    base_url: String,
    locks: Mutex<HashMap<PageName, Arc<Mutex<()>>>>,
}

impl Wiki {
    pub fn new(store: PageStore, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            store,
            base_url,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(paths: &ResolvedPaths, config: &WikiConfig) -> Self {
        Self::new(PageStore::open(paths, config), config.base_url())
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resolver(&self) -> WikiLinkResolver<'_> {
        WikiLinkResolver::new(&self.base_url, &self.store)
    }

    pub fn render(&self, markdown: &str) -> String {
        render_markdown(markdown, &self.resolver())
    }

    pub fn page_url(&self, page: &PageName) -> String {
        format!("{}{}", self.base_url, page)
    }

    /// Validates the requested page name, then dispatches.
    pub fn handle_request(
        &self,
        ctx: &RequestContext,
        raw_page: &str,
        action: Action,
    ) -> Result<Response> {
        let page = self.store.page_name(raw_page)?;
        self.handle(ctx, &page, action)
    }

    pub fn handle(&self, ctx: &RequestContext, page: &PageName, action: Action) -> Result<Response> {
        log::debug!("{} {page}", action.name());
        match action {
            Action::Display => self.display(page),
            Action::Edit => self.edit(page),
            Action::Preview { text, token } => Ok(self.preview(page, text, token)),
            Action::Save { text, token } => self.save(ctx, page, text, token),
            Action::Changelog { from, to } => {
                self.changelog(ctx, page, from.as_deref(), to.as_deref())
            }
            Action::Delete => self.delete(ctx, page),
        }
    }

    fn display(&self, page: &PageName) -> Result<Response> {
        let current = self.store.read(page)?;
        if !current.exists {
            let mut response = self.edit(page)?;
            response
                .notices
                .insert(0, Notice::info("This page doesn't exist yet."));
            return Ok(response);
        }

        let mut response = Response::new(page, page.display_title());
        response.body = self.render(&current.content);
        response.options = vec![
            self.option("Edit", page, Some("edit")),
            self.option("Changelog", page, Some("changelog")),
            self.option("Delete", page, Some("delete")),
        ];
        Ok(response)
    }

    fn edit(&self, page: &PageName) -> Result<Response> {
        let current = self.store.read(page)?;
        let mut response = Response::new(page, format!("Editing {}", page.display_title()));
        response.edit_form = Some(EditForm {
            text: current.content,
            token: current.token,
        });
        response.options = vec![self.option("Cancel", page, None)];
        Ok(response)
    }

    fn preview(&self, page: &PageName, text: String, token: EditToken) -> Response {
        let mut response = Response::new(page, format!("Previewing {}", page.display_title()));
        response.body = self.render(&text);
        response.edit_form = Some(EditForm { text, token });
        response.options = vec![self.option("Cancel", page, None)];
        response
    }

    fn save(
        &self,
        ctx: &RequestContext,
        page: &PageName,
        text: String,
        token: EditToken,
    ) -> Result<Response> {
        let lock = self.page_lock(page);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = match self.store.read(page) {
            Ok(current) => current,
            Err(error @ WikiError::Storage { .. }) => {
                log::error!("save of {page} failed: {error}");
                return Ok(self.rejected_save(page, text, token, error));
            }
            Err(error) => return Err(error),
        };
        if let Err(error) = conflict::check(&current, &token) {
            let mut response = self.preview(page, text, token);
            response.title = format!("Editing {}", page.display_title());
            response.notices.push(Notice::warning(format!(
                "{error}. Your text is shown below; merge it with the current version and save again."
            )));
            return Ok(response);
        }

        match self.store.write(page, &text, &ctx.author(), &ctx.deadline) {
            Ok(outcome) => {
                let mut response = Response::new(page, page.display_title());
                if outcome.created {
                    response.notices.push(Notice::info("Creating a new page."));
                }
                response.notices.push(Notice::success("Saved."));
                response.notices.extend(outcome.notices);
                response.redirect = Some(self.page_url(page));
                Ok(response)
            }
            Err(error @ WikiError::Storage { .. }) => {
                log::error!("save of {page} failed: {error}");
                Ok(self.rejected_save(page, text, token, error))
            }
            Err(error) => Err(error),
        }
    }

    /// The edit form re-filled with text that could not be stored.
    fn rejected_save(
        &self,
        page: &PageName,
        text: String,
        token: EditToken,
        error: WikiError,
    ) -> Response {
        let mut response = self.preview(page, text, token);
        response.title = format!("Editing {}", page.display_title());
        response
            .notices
            .push(Notice::error(format!("The page could not be saved: {error}")));
        response
    }

    fn changelog(
        &self,
        ctx: &RequestContext,
        page: &PageName,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Response> {
        let path = self.store.path_for(page);
        let report = build_changelog(self.store.vcs(), &path, from, to, &ctx.deadline)?;

        let mut response = Response::new(page, format!("Changelog of {}", page.display_title()));
        if let Changelog::Available {
            entries,
            comparison,
            ..
        } = &report.changelog
        {
            let mut body = String::new();
            if let Some(comparison) = comparison {
                body.push_str(&format!(
                    "<pre class=\"revision\">{}</pre><pre class=\"revision\">{}</pre>",
                    escape_html(&comparison.from_info),
                    escape_html(&comparison.to_info)
                ));
                body.push_str(&render_diff_html(&comparison.lines));
            }
            body.push_str(&render_entries(&self.page_url(page), entries));
            response.body = body;
        }
        response.changelog = Some(report.changelog);
        response.notices = report.notices;
        response.options = vec![
            self.option("Edit", page, Some("edit")),
            self.option("Back", page, None),
        ];
        Ok(response)
    }

    fn delete(&self, ctx: &RequestContext, page: &PageName) -> Result<Response> {
        let lock = self.page_lock(page);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let outcome = self.store.delete(page, &ctx.author(), &ctx.deadline)?;
        let mut response = Response::new(page, page.display_title());
        response
            .notices
            .push(Notice::success(format!("Deleted {}.", page.display_title())));
        response.notices.extend(outcome.notices);
        response.redirect = Some(self.base_url.clone());
        Ok(response)
    }

    fn option(&self, label: &str, page: &PageName, action: Option<&str>) -> PageOption {
        let url = match action {
            Some(action) => format!("{}?action={action}", self.page_url(page)),
            None => self.page_url(page),
        };
        PageOption {
            label: label.to_string(),
            url,
        }
    }

    /// Locks nobody else holds are dropped before handing one out, so the
    /// map only keeps pages with a save or delete in flight.
    fn page_lock(&self, page: &PageName) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(page.clone()).or_default())
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Revision list wrapped in a form that asks for the changelog again with the
/// chosen `from`/`to` pair.
fn render_entries(page_url: &str, entries: &[ChangelogEntry]) -> String {
    let mut html = format!(
        "<form method=\"get\" action=\"{}\">\
         <input type=\"hidden\" name=\"action\" value=\"changelog\">\
         <ul class=\"changelog\">",
        escape_html(page_url)
    );
    for entry in entries {
        let id = escape_html(&entry.revision.id);
        let when = DateTime::from_timestamp(entry.revision.timestamp, 0)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        html.push_str(&format!(
            "<li><input type=\"radio\" name=\"from\" value=\"{id}\"{}>\
             <input type=\"radio\" name=\"to\" value=\"{id}\"{}> \
             <code>{id}</code> {} <span class=\"author\">{}</span> {when}</li>",
            if entry.from_selected { " checked" } else { "" },
            if entry.to_selected { " checked" } else { "" },
            escape_html(&entry.revision.summary),
            escape_html(&entry.revision.author),
        ));
    }
    html.push_str("</ul><button type=\"submit\">Compare versions</button></form>");
    html
}
