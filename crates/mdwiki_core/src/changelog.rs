use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::notice::Notice;
use crate::process::Deadline;
use crate::vcs::{Revision, VersionControl, validate_revision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Addition,
    Deletion,
    Meta,
    Context,
}

impl DiffLineKind {
    pub fn css_class(self) -> &'static str {
        match self {
            Self::Addition => "addition",
            Self::Deletion => "deletion",
            Self::Meta => "meta",
            Self::Context => "context",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    /// The leading character as git printed it; `None` for an empty line.
    pub marker: Option<char>,
    /// Line text without its leading marker character.
    pub text: String,
}

impl DiffLine {
    /// The line exactly as git printed it.
    pub fn raw(&self) -> String {
        let mut raw = String::with_capacity(self.text.len() + 1);
        raw.extend(self.marker);
        raw.push_str(&self.text);
        raw
    }
}

pub fn classify_diff_line(line: &str) -> DiffLine {
    let kind = if line.starts_with("@@") {
        DiffLineKind::Meta
    } else if line.starts_with('+') {
        DiffLineKind::Addition
    } else if line.starts_with('-') {
        DiffLineKind::Deletion
    } else {
        DiffLineKind::Context
    };
    let mut chars = line.chars();
    let marker = chars.next();
    DiffLine {
        kind,
        marker,
        text: chars.as_str().to_string(),
    }
}

pub fn parse_diff(raw: &str) -> Vec<DiffLine> {
    raw.lines().map(classify_diff_line).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangelogEntry {
    pub revision: Revision,
    pub from_selected: bool,
    pub to_selected: bool,
}

/// Two revisions side by side with the classified diff between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub from: String,
    pub to: String,
    pub from_info: String,
    pub to_info: String,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Changelog {
    Available {
        entries: Vec<ChangelogEntry>,
        comparison: Option<Comparison>,
        from: Option<String>,
        to: Option<String>,
    },
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangelogReport {
    pub changelog: Changelog,
    pub notices: Vec<Notice>,
}

impl ChangelogReport {
    fn unavailable(notice: Notice) -> Self {
        Self {
            changelog: Changelog::Unavailable,
            notices: vec![notice],
        }
    }
}

/// History of the page stored at `path`, plus the diff between `from` and
/// `to` when both are given.
///
/// Revision identifiers are checked before any process runs. A failed
/// comparison keeps the history listing and adds a warning; a failed log
/// degrades to [`Changelog::Unavailable`].
pub fn build_changelog(
    vcs: &dyn VersionControl,
    path: &Path,
    from: Option<&str>,
    to: Option<&str>,
    deadline: &Deadline,
) -> Result<ChangelogReport> {
    let from = non_empty(from).map(validate_revision).transpose()?;
    let to = non_empty(to).map(validate_revision).transpose()?;

    if !vcs.is_available() {
        return Ok(ChangelogReport::unavailable(Notice::info(
            "Page history is unavailable because git is not installed.",
        )));
    }

    let mut notices = Vec::new();
    let comparison = match (from, to) {
        (Some(from), Some(to)) => match compare(vcs, path, from, to, deadline) {
            Ok(comparison) => Some(comparison),
            Err(error) => {
                log::warn!("diff of {} failed: {error}", path.display());
                notices.push(Notice::warning(format!(
                    "Revisions {from} and {to} could not be compared: {error}"
                )));
                None
            }
        },
        _ => None,
    };

    let revisions = match vcs.log(path, deadline) {
        Ok(revisions) => revisions,
        Err(error) => {
            log::warn!("log of {} failed: {error}", path.display());
            return Ok(ChangelogReport::unavailable(Notice::warning(format!(
                "Page history could not be read: {error}"
            ))));
        }
    };

    let to = to
        .map(str::to_string)
        .or_else(|| revisions.first().map(|revision| revision.id.clone()));
    let from = from
        .map(str::to_string)
        .or_else(|| revisions.get(1).map(|revision| revision.id.clone()));

    let entries = revisions
        .into_iter()
        .map(|revision| ChangelogEntry {
            from_selected: from.as_deref() == Some(revision.id.as_str()),
            to_selected: to.as_deref() == Some(revision.id.as_str()),
            revision,
        })
        .collect();

    Ok(ChangelogReport {
        changelog: Changelog::Available {
            entries,
            comparison,
            from,
            to,
        },
        notices,
    })
}

fn compare(
    vcs: &dyn VersionControl,
    path: &Path,
    from: &str,
    to: &str,
    deadline: &Deadline,
) -> Result<Comparison> {
    let from_info = vcs.show(from, deadline)?;
    let to_info = vcs.show(to, deadline)?;
    let raw = vcs.diff(path, from, to, deadline)?;
    Ok(Comparison {
        from: from.to_string(),
        to: to.to_string(),
        from_info,
        to_info,
        lines: parse_diff(&raw),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub fn render_diff_html(lines: &[DiffLine]) -> String {
    let mut html = String::from("<div class=\"diff\">");
    for line in lines {
        html.push_str("<div class=\"line ");
        html.push_str(line.kind.css_class());
        html.push_str("\">");
        html.push_str(&escape_html(&line.text));
        html.push_str("</div>");
    }
    html.push_str("</div>");
    html
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;
    use crate::error::WikiError;
    use crate::vcs::{AuthorIdentity, ChangeKind, CommitOutcome, NoVersionControl};

    /// Replays canned answers and records the calls it receives.
    struct ScriptedVcs {
        revisions: Vec<Revision>,
        diff: String,
        fail_log: bool,
        fail_show: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedVcs {
        fn with_history(ids: &[&str]) -> Self {
            Self {
                revisions: ids
                    .iter()
                    .enumerate()
                    .map(|(index, id)| Revision {
                        id: id.to_string(),
                        author: "mdwiki".to_string(),
                        timestamp: 1_700_000_000 - index as i64,
                        summary: format!("Change at step {index}"),
                    })
                    .collect(),
                diff: "@@ -1 +1 @@\n-old <line>\n+new line\n same".to_string(),
                fail_log: false,
                fail_show: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl VersionControl for ScriptedVcs {
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
            Ok(CommitOutcome::Committed)
        }

        fn log(&self, _path: &Path, _deadline: &Deadline) -> Result<Vec<Revision>> {
            self.calls.lock().expect("lock").push("log".to_string());
            if self.fail_log {
                return Err(WikiError::vcs("log", "timed out after 10s"));
            }
            Ok(self.revisions.clone())
        }

        fn diff(&self, _path: &Path, from: &str, to: &str, _deadline: &Deadline) -> Result<String> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("diff {from} {to}"));
            Ok(self.diff.clone())
        }

        fn show(&self, revision: &str, _deadline: &Deadline) -> Result<String> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("show {revision}"));
            if self.fail_show {
                return Err(WikiError::vcs("show", format!("fatal: bad revision '{revision}'")));
            }
            Ok(format!("commit {revision}\nAuthor: mdwiki"))
        }
    }

    fn page() -> &'static Path {
        Path::new("/srv/wiki/index.markdown")
    }

    #[test]
    fn classifies_diff_lines_and_strips_marker() {
        let lines = parse_diff("@@ -1,2 +1,2 @@\n-gone\n+added\n kept\n");
        let kinds: Vec<_> = lines.iter().map(|line| line.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiffLineKind::Meta,
                DiffLineKind::Deletion,
                DiffLineKind::Addition,
                DiffLineKind::Context
            ]
        );
        assert_eq!(lines[0].text, "@ -1,2 +1,2 @@");
        assert_eq!(lines[1].text, "gone");
        assert_eq!(lines[2].text, "added");
        assert_eq!(lines[3].text, "kept");
        assert_eq!(classify_diff_line("").text, "");
        assert_eq!(classify_diff_line("").marker, None);

        let no_newline = classify_diff_line("\\ No newline at end of file");
        assert_eq!(no_newline.kind, DiffLineKind::Context);
        assert_eq!(no_newline.marker, Some('\\'));
        assert_eq!(no_newline.raw(), "\\ No newline at end of file");
    }

    #[test]
    fn default_selection_marks_two_newest_revisions() {
        let vcs = ScriptedVcs::with_history(&["c3", "b2", "a1"]);
        let report =
            build_changelog(&vcs, page(), None, None, &Deadline::unbounded()).expect("changelog");
        let Changelog::Available {
            entries,
            comparison,
            from,
            to,
        } = report.changelog
        else {
            panic!("expected available changelog");
        };
        assert_eq!(to.as_deref(), Some("c3"));
        assert_eq!(from.as_deref(), Some("b2"));
        assert!(entries[0].to_selected && !entries[0].from_selected);
        assert!(entries[1].from_selected && !entries[1].to_selected);
        assert!(!entries[2].from_selected && !entries[2].to_selected);
        assert!(comparison.is_none());
        assert_eq!(vcs.calls(), vec!["log"]);
    }

    #[test]
    fn explicit_range_produces_comparison() {
        let vcs = ScriptedVcs::with_history(&["c3", "b2", "a1"]);
        let report = build_changelog(
            &vcs,
            page(),
            Some(" a1 "),
            Some("c3"),
            &Deadline::unbounded(),
        )
        .expect("changelog");
        let Changelog::Available {
            entries,
            comparison: Some(comparison),
            ..
        } = report.changelog
        else {
            panic!("expected comparison");
        };
        assert_eq!(comparison.from, "a1");
        assert_eq!(comparison.to_info, "commit c3\nAuthor: mdwiki");
        assert_eq!(comparison.lines.len(), 4);
        assert!(entries[2].from_selected);
        assert_eq!(vcs.calls(), vec!["show a1", "show c3", "diff a1 c3", "log"]);
    }

    #[test]
    fn single_revision_history_selects_only_to() {
        let vcs = ScriptedVcs::with_history(&["a1"]);
        let report =
            build_changelog(&vcs, page(), None, None, &Deadline::unbounded()).expect("changelog");
        let Changelog::Available { from, to, .. } = report.changelog else {
            panic!("expected available changelog");
        };
        assert_eq!(to.as_deref(), Some("a1"));
        assert_eq!(from, None);
    }

    #[test]
    fn unavailable_adapter_reports_unavailable_with_info() {
        let report = build_changelog(&NoVersionControl, page(), None, None, &Deadline::unbounded())
            .expect("changelog");
        assert_eq!(report.changelog, Changelog::Unavailable);
        assert_eq!(report.notices.len(), 1);
        assert_eq!(report.notices[0].severity, crate::notice::Severity::Info);
    }

    #[test]
    fn failing_log_degrades_to_unavailable_with_warning() {
        let mut vcs = ScriptedVcs::with_history(&["a1"]);
        vcs.fail_log = true;
        let report =
            build_changelog(&vcs, page(), None, None, &Deadline::unbounded()).expect("changelog");
        assert_eq!(report.changelog, Changelog::Unavailable);
        assert_eq!(report.notices[0].severity, crate::notice::Severity::Warning);
    }

    #[test]
    fn failed_comparison_still_lists_history() {
        let mut vcs = ScriptedVcs::with_history(&["c3", "b2"]);
        vcs.fail_show = true;
        let report = build_changelog(
            &vcs,
            page(),
            Some("deadbee"),
            Some("c3"),
            &Deadline::unbounded(),
        )
        .expect("changelog");
        let Changelog::Available {
            entries,
            comparison,
            from,
            to,
        } = report.changelog
        else {
            panic!("expected available changelog");
        };
        assert_eq!(entries.len(), 2);
        assert!(comparison.is_none());
        assert_eq!(from.as_deref(), Some("deadbee"));
        assert_eq!(to.as_deref(), Some("c3"));
        assert!(entries[0].to_selected);
        assert_eq!(report.notices.len(), 1);
        assert_eq!(report.notices[0].severity, crate::notice::Severity::Warning);
        assert!(vcs.calls().contains(&"log".to_string()));
    }

    #[test]
    fn option_like_revision_is_rejected_before_running_anything() {
        let vcs = ScriptedVcs::with_history(&["a1"]);
        let error = build_changelog(
            &vcs,
            page(),
            Some("--output=/tmp/x"),
            Some("a1"),
            &Deadline::unbounded(),
        )
        .expect_err("must reject");
        assert_eq!(error.kind(), "invalid_revision");
        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn diff_html_escapes_text() {
        let html = render_diff_html(&parse_diff("-old <line>\n+a & b"));
        assert_eq!(
            html,
            "<div class=\"diff\"><div class=\"line deletion\">old &lt;line&gt;</div>\
             <div class=\"line addition\">a &amp; b</div></div>"
        );
    }
}
