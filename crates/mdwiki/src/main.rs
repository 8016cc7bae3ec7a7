use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use mdwiki_core::changelog::Changelog;
use mdwiki_core::config::{WikiConfig, WikiConfigPatch, load_config, patch_wiki_config};
use mdwiki_core::notice::Notice;
use mdwiki_core::page::EditToken;
use mdwiki_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    resolve_paths,
};
use mdwiki_core::wiki::{Action, RequestContext, Response, Wiki};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Parser)]
#[command(
    name = "mdwiki",
    version,
    about = "Minimal markdown wiki with git-backed page history"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    doc_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print machine-readable JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    doc_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            doc_dir: cli.doc_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the page directory, config and repository")]
    Init(InitArgs),
    #[command(about = "Show runtime layout and versioning state")]
    Status,
    #[command(about = "List every page")]
    List,
    #[command(about = "Print a page with its metadata")]
    Show(PageArgs),
    #[command(about = "Render a page to HTML")]
    Render(PageArgs),
    #[command(about = "Open a page for editing and print its edit token")]
    Edit(PageArgs),
    #[command(about = "Save new page content")]
    Save(SaveArgs),
    #[command(about = "Delete a page")]
    Delete(PageArgs),
    #[command(about = "Show page history and diffs")]
    Log(LogArgs),
    #[command(name = "resolve-link", about = "Resolve a link destination")]
    ResolveLink(ResolveLinkArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .mdwiki/config.toml")]
    no_config: bool,
    #[arg(long, value_name = "URL", help = "Set [wiki].base_url in the config")]
    base_url: Option<String>,
    #[arg(long, value_name = "PAGE", help = "Set [wiki].default_page in the config")]
    default_page: Option<String>,
}

#[derive(Debug, Args)]
struct PageArgs {
    page: String,
}

#[derive(Debug, Args)]
struct SaveArgs {
    page: String,
    #[arg(long, value_name = "PATH", help = "File with the new content, or - for stdin")]
    file: PathBuf,
    #[arg(long, value_name = "TOKEN", help = "Edit token printed by `mdwiki edit`")]
    token: Option<String>,
    #[arg(
        long,
        conflicts_with = "token",
        help = "Overwrite whatever is stored now"
    )]
    force: bool,
}

#[derive(Debug, Args)]
struct LogArgs {
    page: String,
    #[arg(long, value_name = "REV")]
    from: Option<String>,
    #[arg(long, value_name = "REV")]
    to: Option<String>,
}

#[derive(Debug, Args)]
struct ResolveLinkArgs {
    token: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::List) => run_list(&runtime),
        Some(Commands::Show(PageArgs { page })) => run_show(&runtime, &page),
        Some(Commands::Render(PageArgs { page })) => run_render(&runtime, &page),
        Some(Commands::Edit(PageArgs { page })) => run_edit(&runtime, &page),
        Some(Commands::Save(args)) => run_save(&runtime, args),
        Some(Commands::Delete(PageArgs { page })) => run_delete(&runtime, &page),
        Some(Commands::Log(args)) => run_log(&runtime, args),
        Some(Commands::ResolveLink(ResolveLinkArgs { token })) => {
            run_resolve_link(&runtime, &token)
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let (paths, _) = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let patched = patch_wiki_config(
        &paths.config_path,
        &WikiConfigPatch {
            set_base_url: args.base_url,
            set_default_page: args.default_page,
        },
    )?;
    let config = load_config(&paths.config_path)?;

    let wiki = Wiki::open(&paths, &config);
    let vcs = wiki.store().vcs();
    let mut notices = Vec::new();
    if vcs.is_available() {
        if let Err(error) = vcs.ensure_repository(&request_context().deadline) {
            log::warn!("repository setup failed: {error}");
            notices.push(Notice::warning(format!(
                "Pages are stored, but history is disabled: {error}"
            )));
        }
    } else {
        notices.push(Notice::info(
            "versioning is disabled or git was not found; pages are stored without history",
        ));
    }

    if runtime.json {
        return print_json(&json!({
            "project_root": normalize_path(&paths.project_root),
            "doc_dir": normalize_path(&paths.doc_dir),
            "config_path": normalize_path(&paths.config_path),
            "created_dirs": report.created_dirs.len(),
            "wrote_config": report.wrote_config,
            "patched_config": patched,
            "versioning": vcs.is_available(),
            "notices": notices,
        }));
    }

    println!("Initialized mdwiki runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("doc_dir: {}", normalize_path(&paths.doc_dir));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("patched_config: {patched}");
    println!("versioning: {}", format_flag(vcs.is_available()));
    print_notices(&notices);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let wiki = Wiki::open(&paths, &config);
    let page_count = wiki.store().list_pages()?.len();
    let git_binary = mdwiki_core::git::find_git_binary();

    if runtime.json {
        return print_json(&json!({
            "project_root": normalize_path(&paths.project_root),
            "doc_dir": normalize_path(&paths.doc_dir),
            "project_root_exists": status.project_root_exists,
            "doc_dir_exists": status.doc_dir_exists,
            "state_dir_exists": status.state_dir_exists,
            "config_exists": status.config_exists,
            "repository_exists": status.repository_exists,
            "versioning_enabled": config.versioning_enabled(),
            "git_binary": git_binary.as_deref().map(normalize_path),
            "pages": page_count,
            "base_url": wiki.base_url(),
            "warnings": status.warnings,
        }));
    }

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("doc_dir: {}", normalize_path(&paths.doc_dir));
    println!("doc_dir_exists: {}", format_flag(status.doc_dir_exists));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!(
        "repository_exists: {}",
        format_flag(status.repository_exists)
    );
    println!(
        "versioning_enabled: {}",
        format_flag(config.versioning_enabled())
    );
    println!(
        "git_binary: {}",
        git_binary
            .as_deref()
            .map(normalize_path)
            .unwrap_or_else(|| "<not found>".to_string())
    );
    println!("pages: {page_count}");
    println!("base_url: {}", wiki.base_url());
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_list(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let pages = wiki.store().list_pages()?;

    if runtime.json {
        let listing: Vec<_> = pages
            .iter()
            .map(|page| {
                json!({
                    "name": page,
                    "title": page.display_title(),
                    "url": wiki.page_url(page),
                })
            })
            .collect();
        return print_json(&listing);
    }

    println!("pages: {}", pages.len());
    for page in &pages {
        println!("  - {page} ({})", page.display_title());
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_show(runtime: &RuntimeOptions, raw_page: &str) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let page = wiki.store().read(&wiki.store().page_name(raw_page)?)?;

    if runtime.json {
        return print_json(&page);
    }

    println!("page: {}", page.name);
    println!("title: {}", page.name.display_title());
    println!("exists: {}", format_flag(page.exists));
    println!("last_modified: {}", page.last_modified);
    println!("token: {}", display_token(&page.token));
    println!("---");
    print!("{}", page.content);
    if !page.content.is_empty() && !page.content.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, raw_page: &str) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let response = wiki.handle_request(&request_context(), raw_page, Action::Display)?;
    if response.edit_form.is_some() {
        bail!("page '{}' does not exist yet", response.page);
    }
    report_response(runtime, &response, |response| {
        print!("{}", response.body);
    })
}

fn run_edit(runtime: &RuntimeOptions, raw_page: &str) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let response = wiki.handle_request(&request_context(), raw_page, Action::Edit)?;
    report_response(runtime, &response, |response| {
        if let Some(form) = &response.edit_form {
            println!("page: {}", response.page);
            println!("exists: {}", format_flag(!form.token.is_empty()));
            println!("token: {}", display_token(&form.token));
        }
    })
}

fn run_save(runtime: &RuntimeOptions, args: SaveArgs) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let text = read_input(&args.file)?;
    let page = wiki.store().page_name(&args.page)?;

    let token = if args.force {
        wiki.store().read(&page)?.token
    } else {
        args.token.map(EditToken::new).unwrap_or_default()
    };

    let new_token = EditToken::for_content(&text);
    let response = wiki.handle(&request_context(), &page, Action::Save { text, token })?;
    let saved = response.redirect.is_some();
    report_response(runtime, &response, |response| {
        println!("page: {}", response.page);
        println!("saved: {}", format_flag(saved));
        if saved {
            println!("token: {new_token}");
        }
    })?;
    if !saved {
        bail!(
            "page '{}' was not saved; re-run `mdwiki edit {}` to get a fresh token",
            page,
            page
        );
    }
    Ok(())
}

fn run_delete(runtime: &RuntimeOptions, raw_page: &str) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let response = wiki.handle_request(&request_context(), raw_page, Action::Delete)?;
    report_response(runtime, &response, |response| {
        println!("page: {}", response.page);
        println!("deleted: yes");
    })
}

fn run_log(runtime: &RuntimeOptions, args: LogArgs) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let response = wiki.handle_request(
        &request_context(),
        &args.page,
        Action::Changelog {
            from: args.from,
            to: args.to,
        },
    )?;
    report_response(runtime, &response, |response| {
        println!("page: {}", response.page);
        match &response.changelog {
            Some(Changelog::Available {
                entries,
                comparison,
                from,
                to,
            }) => {
                println!("revisions: {}", entries.len());
                println!("from: {}", from.as_deref().unwrap_or("<none>"));
                println!("to: {}", to.as_deref().unwrap_or("<none>"));
                for entry in entries {
                    let marker = selection_marker(entry.from_selected, entry.to_selected);
                    println!(
                        "  {:<7} {} {} ({})",
                        marker,
                        entry.revision.oneline(),
                        entry.revision.author,
                        entry.revision.timestamp
                    );
                }
                if let Some(comparison) = comparison {
                    println!("--- {}", comparison.from);
                    println!("{}", comparison.from_info);
                    println!("+++ {}", comparison.to);
                    println!("{}", comparison.to_info);
                    for line in &comparison.lines {
                        println!("{}", line.raw());
                    }
                }
            }
            Some(Changelog::Unavailable) | None => println!("history: unavailable"),
        }
    })
}

fn run_resolve_link(runtime: &RuntimeOptions, token: &str) -> Result<()> {
    let (paths, config) = resolve_runtime_paths(runtime)?;
    let wiki = Wiki::open(&paths, &config);
    let link = wiki.resolver().resolve(token);

    if runtime.json {
        return print_json(&link);
    }
    println!("token: {token}");
    println!("target_url: {}", link.target_url);
    println!("unresolved: {}", format_flag(link.is_unresolved));
    Ok(())
}

fn report_response<F>(runtime: &RuntimeOptions, response: &Response, print_text: F) -> Result<()>
where
    F: FnOnce(&Response),
{
    if runtime.json {
        return print_json(response);
    }
    print_text(response);
    print_notices(&response.notices);
    Ok(())
}

fn request_context() -> RequestContext {
    let user = env::var("USER").ok().or_else(|| env::var("USERNAME").ok());
    RequestContext::new("local", user)
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read page content from stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, WikiConfig)> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        doc_dir: runtime.doc_dir.clone(),
        config: runtime.config.clone(),
    };

    let (initial, _) = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_notices(notices: &[Notice]) {
    if notices.is_empty() {
        return;
    }
    println!("notices:");
    for notice in notices {
        println!("  - [{}] {}", notice.severity.as_str(), notice.message);
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn selection_marker(from_selected: bool, to_selected: bool) -> &'static str {
    match (from_selected, to_selected) {
        (true, true) => "from,to",
        (true, false) => "from",
        (false, true) => "to",
        (false, false) => "",
    }
}

fn display_token(token: &EditToken) -> &str {
    if token.is_empty() { "<none>" } else { token.as_str() }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use mdwiki_core::changelog::classify_diff_line;

    use super::{Cli, Commands, selection_marker};

    #[test]
    fn save_accepts_stdin_and_token() {
        let cli = Cli::try_parse_from([
            "mdwiki", "--json", "save", "guide/intro", "--file", "-", "--token", "abc123",
        ])
        .expect("parse");
        assert!(cli.json);
        let Some(Commands::Save(args)) = cli.command else {
            panic!("expected save");
        };
        assert_eq!(args.page, "guide/intro");
        assert_eq!(args.file.to_string_lossy(), "-");
        assert_eq!(args.token.as_deref(), Some("abc123"));
        assert!(!args.force);
    }

    #[test]
    fn save_rejects_force_with_token() {
        let parsed = Cli::try_parse_from([
            "mdwiki", "save", "index", "--file", "x.md", "--token", "abc", "--force",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn log_takes_optional_range() {
        let cli = Cli::try_parse_from(["mdwiki", "log", "index", "--from", "a1", "--to", "b2"])
            .expect("parse");
        let Some(Commands::Log(args)) = cli.command else {
            panic!("expected log");
        };
        assert_eq!(args.from.as_deref(), Some("a1"));
        assert_eq!(args.to.as_deref(), Some("b2"));
    }

    #[test]
    fn diff_lines_print_as_git_wrote_them() {
        for raw in [
            "+added",
            "-removed",
            "@@ -1 +1 @@",
            " same",
            "\\ No newline at end of file",
            "",
        ] {
            assert_eq!(classify_diff_line(raw).raw(), raw);
        }
    }

    #[test]
    fn selection_marker_shows_both_ends() {
        assert_eq!(selection_marker(true, true), "from,to");
        assert_eq!(selection_marker(true, false), "from");
        assert_eq!(selection_marker(false, true), "to");
        assert_eq!(selection_marker(false, false), "");
    }
}
