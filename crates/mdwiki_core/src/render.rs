use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};

use crate::changelog::escape_html;
use crate::links::WikiLinkResolver;

fn markdown_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_TASKLISTS
}

/// Renders page markdown to HTML. Every link destination goes through
/// `resolver`; links to missing pages get `class="new"`.
pub fn render_markdown(markdown: &str, resolver: &WikiLinkResolver<'_>) -> String {
    let parser = Parser::new_ext(markdown, markdown_options()).map(|event| match event {
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => {
            let link = resolver.resolve(&dest_url);
            if link.is_unresolved {
                Event::InlineHtml(CowStr::from(unresolved_anchor(&link.target_url, &title)))
            } else {
                Event::Start(Tag::Link {
                    link_type,
                    dest_url: CowStr::from(link.target_url),
                    title,
                    id,
                })
            }
        }
        other => other,
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn unresolved_anchor(href: &str, title: &str) -> String {
    let mut anchor = format!("<a class=\"new\" href=\"{}\"", escape_html(href));
    if !title.is_empty() {
        anchor.push_str(&format!(" title=\"{}\"", escape_html(title)));
    }
    anchor.push('>');
    anchor
}
