use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use opstool_core::backup::{BackupOptions, backup_roadmaps};
use opstool_core::config::{ToolConfig, load_config};
use opstool_core::dates;
use opstool_core::dispatch::{Command as DispatchCommand, DispatchOutcome, execute, parse_command};
use opstool_core::document::{Document, strip_markup};
use opstool_core::edit::{Edit, ReplaceMode, apply, unified_diff};
use opstool_core::error::StoreError;
use opstool_core::llm::{SummaryClient, SummaryClientConfig};
use opstool_core::locate::find_section;
use opstool_core::preflight::{PreflightOptions, SessionName, preflight_session_log};
use opstool_core::repo::{ArtifactStore, GitHubClient, GitWorkspace, GitWorkspaceConfig};
use opstool_core::roster::{RoadmapTargets, RosterOptions, update_master_index};
use opstool_core::survey::{SurveyOptions, render_survey_report, survey_candidates};
use opstool_core::wiki::{CommitPrecondition, MediaWikiClient, PageStore, PageStoreMut};

/// Overwriting an existing page requires this env var to carry the exact
/// page title, as a deliberate second step.
const OVERWRITE_APPROVAL_ENV_VAR: &str = "OPSTOOL_OVERWRITE_APPROVAL";

#[derive(Debug, Parser)]
#[command(
    name = "opstool",
    version,
    about = "Operator CLI for wiki page edits, roadmap backups, and session tooling"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Path to opstool.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Per-page editing operations")]
    Page(PageCommand),
    #[command(about = "Back up roadmap pages into the artifact repository")]
    Backup(BackupArgs),
    #[command(about = "Scan the wiki for roadmap candidate pages")]
    Survey(SurveyArgs),
    #[command(subcommand, about = "Master document index maintenance")]
    Roster(RosterCommand),
    #[command(about = "Create the session log page for an upcoming loop session")]
    Preflight(PreflightArgs),
    #[command(subcommand, about = "Artifact repository file operations")]
    Repo(RepoCommand),
    #[command(about = "Execute one JSON command read from stdin")]
    Dispatch,
}

#[derive(Debug, Subcommand)]
enum PageCommand {
    #[command(about = "Create a new page; fails if it already exists")]
    Create(PageWriteArgs),
    #[command(about = "Replace an existing page wholesale (requires approval env var)")]
    Overwrite(PageWriteArgs),
    #[command(name = "append-section", about = "Append text to the end of a section")]
    AppendSection(AppendSectionArgs),
    #[command(about = "Append text to the end of the page")]
    Append(AppendArgs),
    #[command(about = "Find and replace text on a page")]
    Replace(ReplaceArgs),
    #[command(name = "set-field", about = "Write a field value in a targeted template")]
    SetField(SetFieldArgs),
    #[command(about = "Summarize a section with the language model")]
    Summarize(SummarizeArgs),
}

#[derive(Debug, Args)]
struct PageWriteArgs {
    #[arg(long)]
    title: String,
    #[arg(long, conflicts_with = "from_file")]
    content: Option<String>,
    #[arg(long, value_name = "PATH")]
    from_file: Option<PathBuf>,
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct AppendSectionArgs {
    #[arg(long)]
    title: String,
    #[arg(long, help = "Section title; 0/lead/introduction targets the lead")]
    section: String,
    #[arg(long)]
    text: String,
    #[arg(long)]
    summary: Option<String>,
    #[arg(long, help = "Print the diff instead of committing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct AppendArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    text: String,
    #[arg(long)]
    summary: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ReplaceArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    find: String,
    #[arg(long)]
    replace: String,
    #[arg(long, conflicts_with = "count", help = "Replace every occurrence")]
    all: bool,
    #[arg(long, value_name = "N", help = "Replace the first N occurrences")]
    count: Option<usize>,
    #[arg(long)]
    summary: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct SetFieldArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    template: String,
    #[arg(long, default_value = "loop_id", help = "Template field holding the unique id")]
    match_field: String,
    #[arg(long)]
    match_value: String,
    #[arg(long)]
    field: String,
    #[arg(long)]
    value: String,
    #[arg(long)]
    summary: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct SummarizeArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    section: String,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[arg(long, help = "Discover and hash pages without touching the workspace")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct SurveyArgs {
    #[arg(long, value_name = "PATH", help = "Report file path")]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum RosterCommand {
    #[command(about = "Rebuild and commit the master document index")]
    Update(RosterUpdateArgs),
}

#[derive(Debug, Args)]
struct RosterUpdateArgs {
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct PreflightArgs {
    #[arg(long, help = "YYYY-MM-DD, or 'today'")]
    date: String,
    #[arg(long, help = "Morning, Noon, Afternoon, Evening or Night")]
    session: String,
    #[arg(long, value_name = "ID", help = "Loop id, e.g. ALPHA-L001")]
    loop_id: String,
    #[arg(long, help = "Replace an existing session log page")]
    overwrite: bool,
}

#[derive(Debug, Subcommand)]
enum RepoCommand {
    #[command(about = "Upload a local file into the artifact repository")]
    Put(RepoPutArgs),
    #[command(about = "Refresh a local file from the repository head")]
    Fetch(RepoFetchArgs),
}

#[derive(Debug, Args)]
struct RepoPutArgs {
    #[arg(value_name = "LOCAL_PATH")]
    path: PathBuf,
    #[arg(long, value_name = "REPO_PATH", help = "Destination path in the repository")]
    dest: Option<String>,
    #[arg(long)]
    message: Option<String>,
}

#[derive(Debug, Args)]
struct RepoFetchArgs {
    #[arg(value_name = "REPO_PATH")]
    path: String,
    #[arg(long, value_name = "PATH", help = "Local file to overwrite")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&resolve_config_path(cli.config.as_deref()))?;

    match cli.command {
        Commands::Page(command) => run_page(&config, command),
        Commands::Backup(args) => run_backup(&config, args),
        Commands::Survey(args) => run_survey(&config, args),
        Commands::Roster(RosterCommand::Update(args)) => run_roster_update(&config, args),
        Commands::Preflight(args) => run_preflight(&config, args),
        Commands::Repo(RepoCommand::Put(args)) => run_repo_put(&config, args),
        Commands::Repo(RepoCommand::Fetch(args)) => run_repo_fetch(&config, args),
        Commands::Dispatch => run_dispatch(&config),
    }
}

fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(value) = env::var("OPSTOOL_CONFIG") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from("opstool.toml")
}

fn run_page(config: &ToolConfig, command: PageCommand) -> Result<()> {
    match command {
        PageCommand::Create(args) => run_page_create(config, args),
        PageCommand::Overwrite(args) => run_page_overwrite(config, args),
        PageCommand::AppendSection(args) => {
            let AppendSectionArgs {
                title,
                section,
                text,
                summary,
                dry_run,
            } = args;
            run_applied_edit(
                config,
                &title,
                Edit::AppendToSection {
                    title: section,
                    text,
                },
                summary,
                dry_run,
            )
        }
        PageCommand::Append(args) => {
            let AppendArgs {
                title,
                text,
                summary,
                dry_run,
            } = args;
            run_applied_edit(config, &title, Edit::AppendToDocument { text }, summary, dry_run)
        }
        PageCommand::Replace(args) => {
            let ReplaceArgs {
                title,
                find,
                replace,
                all,
                count,
                summary,
                dry_run,
            } = args;
            let mode = match (all, count) {
                (true, _) => ReplaceMode::All,
                (false, Some(count)) => ReplaceMode::FirstN(count),
                (false, None) => ReplaceMode::FirstN(1),
            };
            run_applied_edit(
                config,
                &title,
                Edit::ReplaceText {
                    find,
                    replace,
                    mode,
                },
                summary,
                dry_run,
            )
        }
        PageCommand::SetField(args) => {
            let SetFieldArgs {
                title,
                template,
                match_field,
                match_value,
                field,
                value,
                summary,
                dry_run,
            } = args;
            run_applied_edit(
                config,
                &title,
                Edit::SetTemplateField {
                    name: template,
                    match_field,
                    match_value,
                    field,
                    value,
                },
                summary,
                dry_run,
            )
        }
        PageCommand::Summarize(args) => run_page_summarize(config, args),
    }
}

fn run_page_create(config: &ToolConfig, args: PageWriteArgs) -> Result<()> {
    let content = content_from(&args)?;
    let mut client = MediaWikiClient::from_tool_config(config)?;
    if client.exists(&args.title)? {
        bail!(
            "page '{}' already exists; use `opstool page overwrite` for existing pages",
            args.title
        );
    }
    login_for_write(&mut client)?;
    let summary = args
        .summary
        .unwrap_or_else(|| format!("opstool: create page '{}'", args.title));
    let receipt = client.commit(&args.title, &content, &summary, CommitPrecondition::None)?;

    println!("created: {}", args.title);
    print_revision(receipt.revision_id);
    print_page_url(config, &args.title);
    Ok(())
}

fn run_page_overwrite(config: &ToolConfig, args: PageWriteArgs) -> Result<()> {
    let approval = env::var(OVERWRITE_APPROVAL_ENV_VAR).unwrap_or_default();
    if approval.trim() != args.title.trim() {
        bail!(
            "overwrite of '{}' halted: set {OVERWRITE_APPROVAL_ENV_VAR} to the exact page title to approve",
            args.title
        );
    }

    let content = content_from(&args)?;
    let mut client = MediaWikiClient::from_tool_config(config)?;
    let page = match client.fetch(&args.title) {
        Err(StoreError::PageMissing { title }) => {
            bail!("page '{title}' does not exist; use `opstool page create`")
        }
        other => other?,
    };
    login_for_write(&mut client)?;
    let summary = args
        .summary
        .unwrap_or_else(|| format!("opstool: overwrite page '{}'", args.title));
    let receipt = client.commit(
        &args.title,
        &content,
        &summary,
        CommitPrecondition::BaseRevision(page.revision_id),
    )?;

    println!("overwritten: {}", args.title);
    print_revision(receipt.revision_id);
    print_page_url(config, &args.title);
    Ok(())
}

fn run_applied_edit(
    config: &ToolConfig,
    title: &str,
    edit: Edit,
    summary: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let mut client = MediaWikiClient::from_tool_config(config)?;
    let page = client.fetch(title)?;
    let base_revision = page.revision_id;
    let doc = Document::parse(page.content)
        .with_context(|| format!("failed to parse page '{title}'"))?;

    let summary = summary.unwrap_or_else(|| format!("opstool: {} on '{title}'", edit.describe()));
    let output = apply(&doc, &edit)?;
    if output == doc.raw() {
        println!("unchanged: {title}");
        return Ok(());
    }

    if dry_run {
        println!("dry run: {title}");
        println!("summary: {summary}");
        print!("{}", unified_diff(doc.raw(), &output));
        return Ok(());
    }

    login_for_write(&mut client)?;
    let receipt = client.commit(
        title,
        &output,
        &summary,
        CommitPrecondition::BaseRevision(base_revision),
    )?;
    println!("edited: {title}");
    println!("action: {}", edit.describe());
    print_revision(receipt.revision_id);
    print_page_url(config, title);
    Ok(())
}

fn run_page_summarize(config: &ToolConfig, args: SummarizeArgs) -> Result<()> {
    let mut client = MediaWikiClient::from_tool_config(config)?;
    let page = client.fetch(&args.title)?;
    let doc = Document::parse(page.content)
        .with_context(|| format!("failed to parse page '{}'", args.title))?;
    let section = find_section(&doc, &args.section)
        .with_context(|| format!("cannot summarize '{}' on '{}'", args.section, args.title))?;
    let body = &doc.raw()[section.body_start..section.subtree_end];
    let text = strip_markup(body);
    if text.trim().is_empty() {
        bail!("section '{}' has no readable content", args.section);
    }

    let llm = SummaryClient::new(SummaryClientConfig::from_config(config)?)?;
    let summary = llm.summarize(text.trim())?;

    println!("page: {}", args.title);
    println!("section: {}", args.section);
    println!();
    println!("{}", summary.trim());
    Ok(())
}

fn run_backup(config: &ToolConfig, args: BackupArgs) -> Result<()> {
    let mut client = MediaWikiClient::from_tool_config(config)?;
    let workspace = if args.dry_run {
        None
    } else {
        Some(GitWorkspace::new(GitWorkspaceConfig::from_config(config)?)?)
    };
    let options = BackupOptions {
        categories: config.roadmap_categories(),
        backup_dir: config.backup_dir(),
        stamp: dates::branch_stamp()?,
        dry_run: args.dry_run,
    };

    let report = backup_roadmaps(&mut client, workspace.as_ref(), &options)?;

    println!("roadmap backup");
    println!("dry_run: {}", args.dry_run);
    println!("discovered: {}", report.discovered);
    for page in &report.pages {
        println!("page: {} -> {}", page.title, page.file_name);
    }
    println!("branch: {}", report.branch.as_deref().unwrap_or("<none>"));
    println!("committed: {}", report.committed);
    if let Some(commit_id) = &report.commit_id {
        println!("commit: {commit_id}");
    }
    if let Some(url) = &report.pull_request_url {
        println!("pull_request: {url}");
    }
    if report.unchanged {
        println!("no changes since last backup");
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    println!("requests: {}", report.request_count);
    Ok(())
}

fn run_survey(config: &ToolConfig, args: SurveyArgs) -> Result<()> {
    let mut client = MediaWikiClient::from_tool_config(config)?;
    let options = SurveyOptions {
        namespace: config.survey_namespace(),
        confident_prefix: config.survey_prefix(),
        confident_suffix: config.survey_suffix(),
        keywords: config.survey_keywords(),
    };
    let report = survey_candidates(&mut client, &options)?;
    let rendered = render_survey_report(&report, &options, &dates::report_stamp()?);

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from("roadmap_candidate_report.txt"));
    fs::write(&output, rendered)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("roadmap candidate survey");
    println!("scanned: {}", report.scanned);
    println!("confident: {}", report.confident.len());
    println!("uncertain: {}", report.uncertain.len());
    println!("report: {}", output.display());
    Ok(())
}

fn run_roster_update(config: &ToolConfig, args: RosterUpdateArgs) -> Result<()> {
    let mut client = MediaWikiClient::from_tool_config(config)?;
    if !args.dry_run {
        login_for_write(&mut client)?;
    }
    let report = update_master_index(
        &mut client,
        &roadmap_targets(config),
        &RosterOptions {
            index_page: config.index_page(),
            footer: config.index_footer(),
            dry_run: args.dry_run,
        },
    )?;

    println!("master index update");
    println!("index_page: {}", report.index_page);
    println!("entries: {}", report.entries.len());
    for entry in &report.entries {
        println!("entry: {} -> {}", entry.operation, entry.page_title);
    }
    println!("committed: {}", report.committed);
    if report.unchanged {
        println!("index already up to date");
    }
    print_revision(report.revision_id);
    for error in &report.errors {
        println!("error: {error}");
    }
    Ok(())
}

fn run_preflight(config: &ToolConfig, args: PreflightArgs) -> Result<()> {
    let date = if args.date.trim().eq_ignore_ascii_case("today") {
        dates::today_string()?
    } else {
        args.date.trim().to_string()
    };
    let session = SessionName::parse(&args.session).with_context(|| {
        format!(
            "invalid session name: {} (expected Morning/Noon/Afternoon/Evening/Night)",
            args.session
        )
    })?;

    let mut client = MediaWikiClient::from_tool_config(config)?;
    login_for_write(&mut client)?;
    let report = preflight_session_log(
        &mut client,
        &roadmap_targets(config),
        &PreflightOptions {
            date,
            session,
            loop_id: args.loop_id.trim().to_uppercase(),
            overwrite: args.overwrite,
            session_log_prefix: config.session_log_prefix(),
            article_url_template: config.article_url_template(),
        },
    )?;

    println!("preflight session log");
    println!("loop_id: {}", report.loop_id);
    println!("roadmap: {}", report.roadmap_title);
    println!("page: {}", report.page_title);
    println!("created: {}", report.created);
    print_revision(report.revision_id);
    print_page_url(config, &report.page_title);
    Ok(())
}

fn run_repo_put(config: &ToolConfig, args: RepoPutArgs) -> Result<()> {
    let content = fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let file_name = args
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .context("local path has no file name")?;
    let dest = args.dest.unwrap_or_else(|| file_name.to_string());
    let message = args
        .message
        .unwrap_or_else(|| format!("opstool: update {dest}"));

    let workspace = GitWorkspace::new(GitWorkspaceConfig::from_config(config)?)?;
    match workspace.put_file(&dest, &content, &message)? {
        Some(commit_id) => {
            println!("uploaded: {dest}");
            println!("commit: {commit_id}");
        }
        None => println!("unchanged: {dest}"),
    }
    Ok(())
}

fn run_repo_fetch(config: &ToolConfig, args: RepoFetchArgs) -> Result<()> {
    let client = GitHubClient::from_config(config)?;
    let content = client.fetch_file(&args.path)?;

    let output = match args.output {
        Some(path) => path,
        None => {
            let file_name = Path::new(&args.path)
                .file_name()
                .and_then(|name| name.to_str())
                .context("repository path has no file name")?;
            PathBuf::from(file_name)
        }
    };
    fs::write(&output, content)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("fetched: {}", args.path);
    println!("wrote: {}", output.display());
    Ok(())
}

fn run_dispatch(config: &ToolConfig) -> Result<()> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read command from stdin")?;

    let outcome = dispatch_outcome(config, &input);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_success() {
        process::exit(1);
    }
    Ok(())
}

fn dispatch_outcome(config: &ToolConfig, input: &str) -> DispatchOutcome {
    let command = match parse_command(input) {
        Ok(command) => command,
        Err(error) => return DispatchOutcome::failure("unknown", format!("{error:#}")),
    };
    let action = command.action_name();
    match prepare_and_execute(config, command) {
        Ok(outcome) => outcome,
        Err(error) => DispatchOutcome::failure(action, format!("{error:#}")),
    }
}

fn prepare_and_execute(config: &ToolConfig, command: DispatchCommand) -> Result<DispatchOutcome> {
    if matches!(command, DispatchCommand::PutArtifact { .. }) {
        let workspace = GitWorkspace::new(GitWorkspaceConfig::from_config(config)?)?;
        let mut store = NoWikiStore;
        return Ok(execute(command, &mut store, &workspace));
    }
    let mut client = MediaWikiClient::from_tool_config(config)?;
    login_for_write(&mut client)?;
    Ok(execute(command, &mut client, &NoArtifactStore))
}

/// Placeholder store for dispatch actions that never touch the wiki.
struct NoWikiStore;

impl PageStore for NoWikiStore {
    fn fetch(&mut self, _title: &str) -> Result<opstool_core::wiki::RemotePage, StoreError> {
        Err(StoreError::Protocol("wiki store is not used for this action".to_string()))
    }

    fn exists(&mut self, _title: &str) -> Result<bool, StoreError> {
        Err(StoreError::Protocol("wiki store is not used for this action".to_string()))
    }

    fn category_members(&mut self, _category: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Protocol("wiki store is not used for this action".to_string()))
    }

    fn all_pages(&mut self, _namespace: i32) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Protocol("wiki store is not used for this action".to_string()))
    }

    fn request_count(&self) -> usize {
        0
    }
}

impl PageStoreMut for NoWikiStore {
    fn login(&mut self, _username: &str, _password: &str) -> Result<(), StoreError> {
        Err(StoreError::Protocol("wiki store is not used for this action".to_string()))
    }

    fn commit(
        &mut self,
        _title: &str,
        _content: &str,
        _summary: &str,
        _precondition: CommitPrecondition,
    ) -> Result<opstool_core::wiki::CommitReceipt, StoreError> {
        Err(StoreError::Protocol("wiki store is not used for this action".to_string()))
    }
}

/// Placeholder artifact store for dispatch actions that never touch the
/// repository.
struct NoArtifactStore;

impl ArtifactStore for NoArtifactStore {
    fn put_file(&self, _path: &str, _content: &str, _message: &str) -> Result<Option<String>> {
        bail!("artifact store is not used for this action")
    }
}

fn roadmap_targets(config: &ToolConfig) -> RoadmapTargets {
    RoadmapTargets {
        categories: config.roadmap_categories(),
        template: config.roadmap_template(),
        id_field: config.roadmap_id_field(),
        operation_field: config.roadmap_operation_field(),
    }
}

fn content_from(args: &PageWriteArgs) -> Result<String> {
    match (&args.content, &args.from_file) {
        (Some(content), None) => Ok(content.clone()),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        (Some(_), Some(_)) => bail!("--content and --from-file are mutually exclusive"),
        (None, None) => bail!("provide page content with --content or --from-file"),
    }
}

fn login_for_write(client: &mut MediaWikiClient) -> Result<()> {
    let username = env::var("WIKI_BOT_USER")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_USER is required for write operations"))?;
    let password = env::var("WIKI_BOT_PASS")
        .map_err(|_| anyhow::anyhow!("WIKI_BOT_PASS is required for write operations"))?;
    client
        .login(username.trim(), password.trim())
        .context("wiki login failed")?;
    Ok(())
}

fn print_revision(revision_id: Option<i64>) {
    match revision_id {
        Some(revision_id) => println!("revision: {revision_id}"),
        None => println!("revision: <none>"),
    }
}

fn print_page_url(config: &ToolConfig, title: &str) {
    if let Some(url) = config.page_url(title) {
        println!("url: {url}");
    }
}
