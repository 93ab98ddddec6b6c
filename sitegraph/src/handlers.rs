use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sitegraph_core::config::{Settings, expand};
use sitegraph_core::crawl::CrawlRunner;
use sitegraph_core::data::{Database, lock_db};
use sitegraph_core::jobs::TokioJobQueue;
use sitegraph_core::map::GraphMode;
use sitegraph_core::model::{
    Execution, ExecutionStatus, RecordDraft, RecordSummary, RecordUpdate, parse_tags,
};
use sitegraph_core::scheduler::{RecordWatcher, Scheduler};
use sitegraph_scanner::{Boundary, Crawler};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

// Re-export crawl helpers from sitegraph-core
pub use sitegraph_core::crawl::{extract_url_path, generate_crawl_report};

const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "sitegraph.db";

/// Sets up the fmt subscriber on stderr. `RUST_LOG` wins over `default_level`;
/// `--verbose` bumps the default to debug.
pub fn init_tracing(default_level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { default_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Loads the settings file and applies the global `--db` and `--timeout` overrides.
pub fn load_settings(matches: &ArgMatches) -> Result<Settings> {
    let config = matches.get_one::<PathBuf>("config");
    let mut settings = Settings::load(config.map(PathBuf::as_path))
        .context("Failed to read the settings file")?;

    if let Some(db) = matches.get_one::<PathBuf>("db") {
        settings.database_path = db.display().to_string();
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        settings.request_timeout_secs = *timeout;
    }
    Ok(settings)
}

pub fn open_database(settings: &Settings) -> Result<Database> {
    let path = settings.database_path();
    if !Database::exists(&path) {
        bail!(
            "No database at {}. Run `sitegraph init` first or pass --db.",
            path.display()
        );
    }
    Database::new(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn crawler_for(settings: &Settings) -> Result<Crawler> {
    Ok(Crawler::with_settings(
        settings.request_timeout_secs,
        &settings.user_agent,
    )?)
}

/// Load and parse URLs from a file
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file {}", path.display()))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        bail!("No valid URLs found in {}", path.display());
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && url.has_host()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.has_host()
    {
        return Some(with_scheme);
    }

    warn!("Skipping invalid URL '{}'", line);
    None
}

/// Parses `1, 2,3` into ids. Duplicates are dropped, order is kept.
pub fn parse_record_ids(input: &str) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: i64 = part
            .parse()
            .with_context(|| format!("Invalid record id '{}'", part))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        bail!("At least one record id is required");
    }
    Ok(ids)
}

/// Boundary that keeps a crawl on the origin of `url`.
pub fn origin_boundary(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid URL '{}'", url))?;
    Ok(format!(
        "{}(/|$)",
        regex::escape(&parsed.origin().ascii_serialization())
    ))
}

pub fn record_draft_from_args(args: &ArgMatches) -> Result<RecordDraft> {
    let raw_url = args.get_one::<String>("url").context("--url is required")?;
    let url = parse_url_line(raw_url).with_context(|| format!("Invalid URL '{}'", raw_url))?;

    Ok(RecordDraft {
        url,
        label: args
            .get_one::<String>("label")
            .cloned()
            .context("--label is required")?,
        interval: args.get_one::<u64>("interval").copied().unwrap_or(0),
        active: !args.get_flag("inactive"),
        regex: args
            .get_one::<String>("regex")
            .cloned()
            .unwrap_or_else(|| ".*".to_string()),
        tags: args
            .get_one::<String>("tags")
            .map(|t| parse_tags(t))
            .unwrap_or_default(),
    })
}

pub fn record_update_from_args(args: &ArgMatches) -> RecordUpdate {
    RecordUpdate {
        url: args.get_one::<String>("url").cloned(),
        label: args.get_one::<String>("label").cloned(),
        interval: args.get_one::<u64>("interval").copied(),
        active: None,
        regex: args.get_one::<String>("regex").cloned(),
        tags: args.get_one::<String>("tags").map(|t| parse_tags(t)),
    }
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

fn spinner(message: String) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message);
    Ok(spinner)
}

fn status_label(status: ExecutionStatus) -> colored::ColoredString {
    match status {
        ExecutionStatus::Finished => status.as_str().green(),
        ExecutionStatus::InProgress => status.as_str().cyan(),
        ExecutionStatus::InQueue => status.as_str().blue(),
        ExecutionStatus::NeverExecuted => status.as_str().dimmed(),
        ExecutionStatus::Unknown => status.as_str().red(),
    }
}

fn interval_label(interval: u64) -> String {
    if interval == 0 {
        "once".to_string()
    } else {
        format!("every {}s", interval)
    }
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  SITEGRAPH INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let config_dir = expand(
        args.get_one::<String>("PATH")
            .context("PATH has a default value")?,
    );
    let force = args.get_flag("force");
    let db_path = config_dir.join(DATABASE_FILE);
    let config_path = config_dir.join(CONFIG_FILE);

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    if Database::exists(&db_path) && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("Database already exists at:");
        println!(
            "  {} {}",
            "•".yellow(),
            db_path.display().to_string().bright_white()
        );
        println!();
        println!(
            "{}",
            "Overwriting deletes every record, execution and graph.".yellow()
        );

        let response = print_prompt("Do you want to continue? [y/N]:")?;
        println!();

        if response != "y" && response != "yes" {
            println!("{} Initialization cancelled.", "✗".red().bold());
            return Ok(());
        }
    }

    println!("{} Creating directory structure...", "→".blue());
    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    println!(
        "  {} {}",
        "✓".green(),
        config_dir.display().to_string().bright_white()
    );

    if Database::exists(&db_path) {
        Database::drop(&db_path)?;
        println!("{} Existing database removed", "✓".green().bold());
    }

    let settings = Settings {
        database_path: db_path.display().to_string(),
        ..Settings::default()
    };
    if force || !config_path.exists() {
        fs::write(&config_path, serde_json::to_string_pretty(&settings)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!(
            "  {} {}",
            "✓".green(),
            config_path.display().to_string().bright_white()
        );
    } else {
        println!(
            "{} Keeping existing settings: {}",
            "→".blue(),
            config_path.display().to_string().bright_white()
        );
    }

    println!("{} Creating database...", "→".blue());
    Database::new(&db_path)?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Settings: {}",
        "✓".green().bold(),
        config_path.display().to_string().bright_white()
    );
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

pub fn handle_record_add(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let draft = record_draft_from_args(args)?;
    let mut db = open_database(settings)?;
    let record = db.create_record(&draft)?;

    println!(
        "{} Added record {} {} ({})",
        "✓".green().bold(),
        record.id.to_string().cyan(),
        record.label.bright_white(),
        interval_label(record.interval)
    );
    if !record.active {
        println!("{} Record is inactive; it will not be crawled", "ℹ".blue());
    }
    Ok(())
}

pub fn handle_record_import(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let file = args
        .get_one::<PathBuf>("file")
        .context("--file is required")?;
    let interval = args.get_one::<u64>("interval").copied().unwrap_or(0);
    let tags = args
        .get_one::<String>("tags")
        .map(|t| parse_tags(t))
        .unwrap_or_default();

    let urls = load_urls_from_file(file)?;
    let mut db = open_database(settings)?;

    let mut added = 0;
    for url in urls {
        let draft = RecordDraft {
            label: url.clone(),
            regex: origin_boundary(&url)?,
            url,
            interval,
            active: true,
            tags: tags.clone(),
        };
        match db.create_record(&draft) {
            Ok(record) => {
                added += 1;
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    record.id.to_string().cyan(),
                    record.url.bright_white()
                );
            }
            Err(e) => println!("  {} {}: {}", "✗".red(), draft.url, e),
        }
    }

    println!();
    println!(
        "{} Imported {} records from {}",
        "✓".green().bold(),
        added,
        file.display()
    );
    Ok(())
}

pub fn handle_record_update(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let id = *args.get_one::<i64>("id").context("--id is required")?;
    let update = record_update_from_args(args);
    if update.is_empty() {
        bail!("Nothing to update; pass at least one of --url, --label, --regex, --interval, --tags");
    }

    let mut db = open_database(settings)?;
    let record = db.update_record(id, &update)?;
    println!(
        "{} Updated record {} {}",
        "✓".green().bold(),
        record.id.to_string().cyan(),
        record.label.bright_white()
    );
    Ok(())
}

pub fn handle_record_delete(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let id = *args.get_one::<i64>("id").context("--id is required")?;
    let mut db = open_database(settings)?;
    let record = db.delete_record(id)?;
    println!(
        "{} Deleted record {} {} with its executions and graph",
        "✓".green().bold(),
        record.id.to_string().cyan(),
        record.label.bright_white()
    );
    Ok(())
}

pub fn handle_record_set_active(
    args: &ArgMatches,
    settings: &Settings,
    active: bool,
) -> Result<()> {
    let id = *args.get_one::<i64>("id").context("--id is required")?;
    let db = open_database(settings)?;
    let record = db.set_active(id, active)?;
    let state = if active {
        "activated".green()
    } else {
        "deactivated".yellow()
    };
    println!(
        "{} Record {} {} {}",
        "✓".green().bold(),
        record.id.to_string().cyan(),
        record.label.bright_white(),
        state
    );
    Ok(())
}

pub fn handle_record_list(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let summaries = db.record_summaries()?;

    if args.get_one::<String>("format").map(String::as_str) == Some("json") {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("{} No records yet. Add one with `sitegraph record add`.", "ℹ".blue());
        return Ok(());
    }

    print_divider();
    for summary in &summaries {
        print_summary(summary);
    }
    print_divider();
    println!("{} records", summaries.len().to_string().cyan());
    Ok(())
}

fn print_summary(summary: &RecordSummary) {
    let record = &summary.record;
    let active = if record.active {
        "active".green()
    } else {
        "inactive".dimmed()
    };
    println!(
        "{} {}  {}  [{}]",
        format!("#{}", record.id).cyan().bold(),
        record.label.bright_white().bold(),
        active,
        interval_label(record.interval)
    );
    println!("    {} {}", "url:".blue(), record.url);
    println!("    {} {}", "boundary:".blue(), record.regex);
    if !summary.tags.is_empty() {
        println!("    {} {}", "tags:".blue(), summary.tags.join(", "));
    }
    let last = summary
        .last_crawl
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "    {} {} ({})",
        "last crawl:".blue(),
        last,
        status_label(summary.last_status)
    );
}

pub async fn handle_crawl(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let url = args.get_one::<Url>("url").context("--url is required")?;
    let regex = args.get_one::<String>("regex").map(String::as_str).unwrap_or("");
    let json = args.get_one::<String>("format").map(String::as_str) == Some("json");

    let boundary = Boundary::new(regex).context("Invalid boundary regex")?;

    let progress = spinner(format!("Crawling {}", url))?;
    let bar = progress.clone();
    let crawler = crawler_for(settings)?.with_progress_callback(Arc::new(move |url: String| {
        bar.set_message(extract_url_path(&url));
    }));

    let nodes = crawler.crawl(url.as_str(), &boundary).await;
    progress.finish_and_clear();

    if nodes.is_empty() {
        bail!("Nothing could be fetched from {}", url);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
    } else {
        println!("{} Crawl complete!\n", "✓".green().bold());
        print!("{}", generate_crawl_report(&nodes));
    }
    Ok(())
}

pub async fn handle_run(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let id = *args.get_one::<i64>("id").context("--id is required")?;
    let db = open_database(settings)?.shared();
    let runner = CrawlRunner::new(db.clone(), crawler_for(settings)?);

    let progress = spinner(format!("Crawling record {}", id))?;
    let result = runner.start_execution(id).await;
    progress.finish_and_clear();

    let execution_id = result?;
    let db = lock_db(&db)?;
    if let Some(execution) = db.get_execution(execution_id)? {
        print_execution(&execution);
    }
    let nodes = db.nodes_for_records(&[id])?.len();
    let edges = db.edges_for_records(&[id])?.len();
    println!(
        "{} Stored {} nodes and {} edges",
        "✓".green().bold(),
        nodes.to_string().cyan(),
        edges.to_string().cyan()
    );
    Ok(())
}

pub fn handle_graph(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let ids = parse_record_ids(
        args.get_one::<String>("records")
            .context("--records is required")?,
    )?;
    let mode = GraphMode::from_name(
        args.get_one::<String>("mode")
            .map(String::as_str)
            .unwrap_or("website"),
    );

    let mut db = open_database(settings)?;
    let graph = db.get_graph(&ids, mode)?;
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

pub fn handle_executions(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;

    if let Some(execution_id) = args.get_one::<i64>("links") {
        let execution = db
            .get_execution(*execution_id)?
            .with_context(|| format!("No execution with id {}", execution_id))?;
        print_execution(&execution);
        for link in db.execution_links(execution.id)? {
            println!("    {}", link);
        }
        return Ok(());
    }

    let executions = match args.get_one::<i64>("record") {
        Some(record_id) => {
            db.get_record(*record_id)?;
            db.executions_for_record(*record_id)?
        }
        None => db.list_executions()?,
    };

    if executions.is_empty() {
        println!("{} No executions yet", "ℹ".blue());
        return Ok(());
    }
    for execution in &executions {
        print_execution(execution);
    }
    Ok(())
}

fn print_execution(execution: &Execution) {
    let finished = execution
        .last_crawl
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{} record {}  {}  {}  {}ms  {}",
        format!("#{}", execution.id).cyan().bold(),
        execution.record_id,
        status_label(execution.status),
        execution.url,
        execution.duration_ms,
        finished.dimmed()
    );
}

/// Runs the scheduler until Ctrl-C, polling the records table for changes.
pub async fn handle_serve(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?.shared();
    let runner = Arc::new(CrawlRunner::new(db.clone(), crawler_for(settings)?));
    let queue = Arc::new(TokioJobQueue::new(runner.into_job_runner()));
    let scheduler = Arc::new(
        Scheduler::new(db.clone(), queue.clone())
            .with_crawl_on_deactivate(settings.crawl_on_deactivate),
    );
    let mut watcher = RecordWatcher::new(scheduler, db);

    let outcomes = watcher.start()?;
    info!(
        "Scheduler started: {} records, {} scheduling actions",
        watcher.known_records(),
        outcomes.len()
    );
    println!(
        "{} Watching {} records (poll every {}s). Press Ctrl-C to stop.",
        "✓".green().bold(),
        watcher.known_records().to_string().cyan(),
        settings.watch_interval_secs
    );

    let mut ticker =
        tokio::time::interval(Duration::from_secs(settings.watch_interval_secs.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Err(e) = watcher.poll() {
                    warn!("Polling records failed: {}", e);
                }
            }
        }
    }

    if let Err(e) = watcher.stop() {
        warn!("Could not release job handles: {}", e);
    }
    queue.shutdown();
    println!("\n{} Scheduler stopped", "✓".green().bold());
    Ok(())
}
