use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use hashgraph::config::{
    CONFIG_DIR, CONFIG_FILE, ConfigError, EffectiveConfig, FeedCandidate, FeedMode,
    default_config_yaml, load_config_file, load_effective_config, parse_delete_policy,
    resolve_feed_files,
};
use hashgraph::feed::{FeedError, FeedTail, open_feed};
use hashgraph::logging::init_logging;
use hashgraph::report::{FeedReport, ReportError, RunReport, write_report};
use hashgraph::TagGraph;
use notify::{RecursiveMode, Watcher};
use serde_json::{Value, json};

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::new("config_error", value.to_string())
    }
}

impl From<FeedError> for CliError {
    fn from(value: FeedError) -> Self {
        let code = match value {
            FeedError::Io { .. } => "feed_io_error",
            FeedError::Malformed { .. } => "malformed_record",
        };
        Self::new(code, value.to_string())
    }
}

impl From<ReportError> for CliError {
    fn from(value: ReportError) -> Self {
        Self::new("report_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "hashgraph")]
#[command(about = "Running average degree of a hashtag co-occurrence graph")]
struct Cli {
    /// Use this config file instead of the layered lookup.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured delete policy (strict or lenient).
    #[arg(long, global = true)]
    delete_policy: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    Load(LoadArgs),
    Run(OutputArgs),
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[arg(required = true)]
    feeds: Vec<PathBuf>,
    /// Feeds whose records are deleted after all inserts.
    #[arg(long = "delete")]
    deletes: Vec<PathBuf>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct OutputArgs {
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long)]
    verify: bool,
}

#[derive(Args, Debug)]
struct WatchArgs {
    feed: PathBuf,
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
    #[arg(long)]
    max_polls: Option<usize>,
}

struct Context {
    cwd: PathBuf,
    home: Option<PathBuf>,
    config: EffectiveConfig,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::new("cwd_error", err.to_string()))?;
    let home = std::env::var_os("HOME").map(PathBuf::from);

    if let Command::Init = cli.command {
        return cmd_init(&cwd);
    }

    let mut config = match cli.config.as_deref() {
        Some(path) => load_config_file(path)?,
        None => load_effective_config(
            &cwd,
            Some(&repo_config_path(&cwd)),
            home.as_deref().map(repo_config_path).as_deref(),
        )?,
    };
    if let Some(raw) = cli.delete_policy.as_deref() {
        config.delete_policy = parse_delete_policy(raw)?;
    }
    init_logging(config.log_level.as_deref())
        .map_err(|err| CliError::new("logging_error", err.to_string()))?;

    let ctx = Context { cwd, home, config };
    match cli.command {
        Command::Init => Ok(()),
        Command::Load(args) => cmd_load(&ctx, args),
        Command::Run(args) => cmd_run(&ctx, args),
        Command::Watch(args) => cmd_watch(&ctx, args),
    }
}

fn cmd_init(cwd: &Path) -> Result<(), CliError> {
    let config_path = repo_config_path(cwd);
    let created = !config_path.exists();
    if created {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| CliError::new("mkdir_error", err.to_string()))?;
        }
        fs::write(&config_path, default_config_yaml())
            .map_err(|err| CliError::new("write_error", err.to_string()))?;
    }
    print_json(&json!({
        "status": "ok",
        "config": config_path,
        "created": created,
    }))
}

fn cmd_load(ctx: &Context, args: LoadArgs) -> Result<(), CliError> {
    let candidates = args
        .feeds
        .into_iter()
        .map(|path| (path, FeedMode::Insert))
        .chain(args.deletes.into_iter().map(|path| (path, FeedMode::Delete)))
        .map(|(path, mode)| FeedCandidate {
            path: absolute(&ctx.cwd, path),
            mode,
        })
        .collect::<Vec<_>>();
    process_and_report(ctx, &candidates, &args.output)
}

fn cmd_run(ctx: &Context, args: OutputArgs) -> Result<(), CliError> {
    if ctx.config.sources.is_empty() {
        return Err(CliError::new(
            "missing_sources",
            "no feed sources configured; add sources in .hashgraph/config.yml or run `hashgraph init`",
        ));
    }
    let candidates = resolve_feed_files(
        &ctx.cwd,
        ctx.home.as_deref(),
        &ctx.config.sources,
        &ctx.config.exclude,
    )?;
    process_and_report(ctx, &candidates, &args)
}

fn process_and_report(
    ctx: &Context,
    candidates: &[FeedCandidate],
    output: &OutputArgs,
) -> Result<(), CliError> {
    let mut graph = TagGraph::with_policy(ctx.config.delete_policy);
    let feeds = process_feeds(&mut graph, candidates, ctx.config.skip_malformed)?;

    if output.verify {
        graph
            .verify()
            .map_err(|err| CliError::new("invariant_violation", err.to_string()))?;
    }

    let report = RunReport::new(&graph, feeds);
    if let Some(path) = output.report.as_deref() {
        let path = absolute(&ctx.cwd, path.to_path_buf());
        write_report(&path, &report)?;
        tracing::info!(path = %path.display(), "wrote run report");
    }

    let mut payload = serde_json::to_value(&report)?;
    if let Value::Object(map) = &mut payload {
        map.insert("status".to_string(), json!("ok"));
        map.remove("generated_at");
    }
    print_json(&payload)
}

fn process_feeds(
    graph: &mut TagGraph,
    candidates: &[FeedCandidate],
    skip_malformed: bool,
) -> Result<Vec<FeedReport>, CliError> {
    let mut reports = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut reader = open_feed(&candidate.path)?.skip_malformed(skip_malformed);
        let applied = match candidate.mode {
            FeedMode::Insert => graph.try_load(reader.by_ref())?,
            FeedMode::Delete => graph.try_unload(reader.by_ref())?,
        };
        tracing::info!(
            path = %candidate.path.display(),
            mode = candidate.mode.as_str(),
            records = applied,
            average_degree = graph.average_degree(),
            "processed feed"
        );
        reports.push(FeedReport::new(
            &candidate.path,
            candidate.mode,
            reader.sha256_hex(),
            reader.counters(),
        ));
    }
    Ok(reports)
}

fn cmd_watch(ctx: &Context, args: WatchArgs) -> Result<(), CliError> {
    let feed_path = absolute(&ctx.cwd, args.feed);
    if !feed_path.is_file() {
        return Err(CliError::new(
            "feed_not_found",
            format!("feed `{}` not found", feed_path.display()),
        ));
    }

    let mut graph = TagGraph::with_policy(ctx.config.delete_policy);
    let mut tail = FeedTail::new(&feed_path).skip_malformed(ctx.config.skip_malformed);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|err| CliError::new("signal_error", err.to_string()))?;
    }

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)
        .map_err(|err| CliError::new("watch_error", err.to_string()))?;
    watcher
        .watch(&feed_path, RecursiveMode::NonRecursive)
        .map_err(|err| CliError::new("watch_error", err.to_string()))?;

    // Timeouts also trigger a poll in case the platform drops events.
    let interval = Duration::from_millis(args.interval_ms.max(1));
    let mut polls = 0usize;
    loop {
        let batch = tail.poll()?;
        polls += 1;
        if !batch.is_empty() {
            let records = graph.load(batch);
            tracing::debug!(records, offset = tail.offset(), "applied appended records");
            print_json(&json!({
                "event": "batch",
                "records": records,
                "stats": graph.stats(),
            }))?;
        }

        if stop.load(Ordering::SeqCst) || args.max_polls.is_some_and(|max| polls >= max) {
            break;
        }
        match rx.recv_timeout(interval) {
            Ok(Ok(event)) => tracing::trace!(kind = ?event.kind, "feed changed"),
            Ok(Err(err)) => tracing::warn!(error = %err, "watcher reported an error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        while rx.try_recv().is_ok() {}
    }

    print_json(&json!({
        "status": "stopped",
        "feed": feed_path,
        "polls": polls,
        "delete_policy": graph.policy().as_str(),
        "counters": tail.counters(),
        "stats": graph.stats(),
    }))
}

fn repo_config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR).join(CONFIG_FILE)
}

fn absolute(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
