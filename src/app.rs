use std::collections::HashMap;
use std::io::Write;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::bulk::{BulkAction, BulkOptions, Phase, Trigger};
use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::client::{MemoryBackend, RestClient, RestOptions, RetryPolicy};
use crate::config::{self, ConfigFile};
use crate::dashboard::Dashboard;
use crate::filter::{DateRange, FilterState, Query};
use crate::notify::Notification;
use crate::output::{self, OutputFormat};
use crate::plan::PlanDraft;
use crate::record::{ingest, Record, RecordKind, TestCase, TestPlan, TestResult};

fn print_banner() {
    const BANNER: &str = r#"
    __       __           __
   / /______/ /___ ______/ /_
  / //_/ __  / __ `/ ___/ __ \
 / ,< / /_/ / /_/ (__  ) / / /
/_/|_|\__,_/\__,_/____/_/ /_/
      kernel test dashboard client
    "#;
    print!("{}", BANNER);
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

fn render_custom_help() -> String {
    let cmd = CliArgs::command();
    let mut out = String::new();

    out.push_str(cmd.get_name());
    if let Some(version) = cmd.get_version() {
        out.push(' ');
        out.push_str(version);
    }
    out.push('\n');

    if let Some(about) = cmd.get_about() {
        out.push_str(&about.to_string());
        out.push('\n');
    }

    if let Some(long_about) = cmd.get_long_about() {
        out.push('\n');
        out.push_str(&long_about.to_string());
        out.push('\n');
    }

    out.push('\n');
    out.push_str("Usage: ");
    out.push_str(cmd.get_name());
    out.push_str(" [OPTIONS]\n\n");

    let mut sections: Vec<(String, Vec<&clap::Arg>)> = Vec::new();
    let mut section_idx: HashMap<String, usize> = HashMap::new();

    for arg in cmd.get_arguments() {
        if arg.is_hide_set() {
            continue;
        }
        let heading = arg.get_help_heading().unwrap_or("Options").to_string();
        let idx = match section_idx.get(&heading).copied() {
            Some(i) => i,
            None => {
                sections.push((heading.clone(), Vec::new()));
                let i = sections.len() - 1;
                section_idx.insert(heading, i);
                i
            }
        };
        sections[idx].1.push(arg);
    }

    for (heading, args) in sections {
        out.push_str(&heading);
        out.push_str(":\n");

        for arg in args {
            let mut parts: Vec<String> = Vec::new();
            if let Some(short) = arg.get_short() {
                parts.push(format!("-{short}"));
            }
            if let Some(long) = arg.get_long() {
                parts.push(format!("--{long}"));
            }
            if let Some(aliases) = arg.get_visible_aliases() {
                for alias in aliases {
                    let rendered = format!("--{alias}");
                    if !parts.iter().any(|p| p == &rendered) {
                        parts.push(rendered);
                    }
                }
            }

            let mut flags = parts.join(", ");
            if arg.get_action().takes_values() {
                let value_name = arg
                    .get_value_names()
                    .and_then(|names| names.first())
                    .map(|name| name.as_str())
                    .unwrap_or("VALUE");
                let placeholder = format!("<{value_name}>");
                let min_values = arg.get_num_args().map(|r| r.min_values()).unwrap_or(1);
                if min_values == 0 {
                    flags.push_str(&format!(" [{placeholder}]"));
                } else {
                    flags.push(' ');
                    flags.push_str(&placeholder);
                }
            }

            out.push_str("  ");
            out.push_str(&flags);
            out.push('\n');

            if let Some(help) = arg.get_help() {
                let help = help.to_string();
                if !help.trim().is_empty() {
                    out.push_str("          ");
                    out.push_str(help.trim());
                    out.push('\n');
                }
            }
            out.push('\n');
        }
    }

    out
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PlanOp {
    Create { file: PathBuf },
    Update { id: String, file: PathBuf },
    Delete { id: String },
}

#[derive(Clone, Debug)]
struct RunConfig {
    rest: RestOptions,
    bulk: BulkOptions,
    kind: RecordKind,
    offline: Option<PathBuf>,
    get: Option<String>,
    query: Query,
    action: Option<BulkAction>,
    ids: Vec<String>,
    select_all: bool,
    yes: bool,
    plan: Option<PlanOp>,
    output: Option<PathBuf>,
    output_format: OutputFormat,
    no_color: bool,
    verbose: u8,
    watch: Option<Duration>,
    ticks: Option<usize>,
}

fn build_plan_op(args: &CliArgs) -> Result<Option<PlanOp>, String> {
    let Some(op) = args.plan.as_deref() else {
        return Ok(None);
    };
    let file = args.plan_file.as_deref().map(config::expand_tilde);
    let id = args
        .plan_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let op = match op.trim().to_lowercase().as_str() {
        "create" => PlanOp::Create {
            file: file.ok_or("--plan create needs --plan-file")?,
        },
        "update" => PlanOp::Update {
            id: id.ok_or("--plan update needs --plan-id")?,
            file: file.ok_or("--plan update needs --plan-file")?,
        },
        "delete" => PlanOp::Delete {
            id: id.ok_or("--plan delete needs --plan-id")?,
        },
        other => {
            return Err(format!(
                "invalid --plan '{other}', expected create, update or delete"
            ))
        }
    };
    Ok(Some(op))
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let no_color = args.no_color || cfg.no_color.unwrap_or(false);

    let plan = build_plan_op(&args)?;
    let kind_raw = args.kind.clone().or(cfg.kind.clone());
    let kind = match (kind_raw.as_deref(), plan.is_some()) {
        (None, true) => RecordKind::TestPlan,
        (None, false) => RecordKind::TestCase,
        (Some(raw), _) => RecordKind::parse(raw)
            .ok_or_else(|| format!("invalid kind '{raw}', expected cases, plans or results"))?,
    };
    if plan.is_some() && kind != RecordKind::TestPlan {
        return Err("--plan only applies to --kind plans".to_string());
    }

    let mut filters = FilterState::new();
    for (key, value) in cfg.filters.unwrap_or_default() {
        filters.set(&key, &value);
    }
    let cli_filters = FilterState::parse_pairs(&args.filter)
        .map_err(|e| format!("invalid --filter: {e}"))?;
    for (key, value) in cli_filters.iter() {
        filters.set(key, value);
    }
    let date_range = DateRange::from_bounds(args.since.as_deref(), args.until.as_deref())
        .map_err(|e| e.to_string())?;
    let query = Query {
        search: args.search.or(cfg.search).unwrap_or_default(),
        filters,
        date_range,
    };

    let action = args
        .action
        .as_deref()
        .map(|a| BulkAction::parse(a, args.tag.clone()))
        .transpose()?;

    let retries = args.retries.or(cfg.retries).unwrap_or(3);
    if retries == 0 {
        return Err("invalid retries, expected at least 1 attempt".to_string());
    }
    let rest = RestOptions {
        base_url: args
            .api_url
            .or(cfg.api_url)
            .unwrap_or_else(|| RestOptions::default().base_url),
        timeout_seconds: args.timeout.or(cfg.timeout).unwrap_or(10),
        proxy: args.proxy.or(cfg.proxy),
        header: args.header.or(cfg.header),
        retry: RetryPolicy {
            max_attempts: retries,
            base_delay: Duration::from_millis(cfg.retry_base_ms.unwrap_or(250)),
            ..RetryPolicy::default()
        },
    };

    let concurrency = args.concurrency.or(cfg.concurrency).unwrap_or(1);
    if concurrency == 0 {
        return Err("invalid concurrency, expected positive integer".to_string());
    }
    let bulk = BulkOptions {
        concurrency,
        rate: args.rate.or(cfg.rate).filter(|r| *r > 0),
        export_dir: config::expand_tilde(
            args.export_dir
                .or(cfg.export_dir)
                .unwrap_or_else(|| ".".to_string())
                .as_str(),
        ),
    };

    let output = args.output.or(cfg.output);
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => OutputFormat::parse(&raw)
            .ok_or_else(|| format!("invalid output format '{raw}', expected text or json"))?,
        None => output
            .as_deref()
            .and_then(output::infer_format_from_path)
            .unwrap_or(OutputFormat::Text),
    };

    let watch = match args.watch {
        None => None,
        Some(0) => Some(cfg.poll_interval.unwrap_or(30)),
        Some(secs) => Some(secs),
    };
    if watch == Some(0) {
        return Err("invalid poll interval, expected positive seconds".to_string());
    }

    Ok(RunConfig {
        rest,
        bulk,
        kind,
        offline: args.offline.or(cfg.offline).map(|p| config::expand_tilde(&p)),
        get: args.get,
        query,
        action,
        ids: args.id,
        select_all: args.select_all,
        yes: args.yes,
        plan,
        output: output.map(|p| config::expand_tilde(&p)),
        output_format,
        no_color,
        verbose: args.verbose,
        watch: watch.map(Duration::from_secs),
        ticks: args.ticks,
    })
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let targets = std::env::var("KDASH_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| s.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_default(level));
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(targets);
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

fn print_notifications(notifications: &[Notification]) {
    for n in notifications {
        println!("{}", n.render());
    }
}

async fn ask(question: &str) -> Result<bool, String> {
    print!("{} {} ", "[?]".bold().cyan(), format!("{question} [y/N]"));
    std::io::stdout()
        .flush()
        .map_err(|e| format!("failed to write prompt: {e}"))?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let answer = lines
        .next_line()
        .await
        .map_err(|e| format!("failed to read answer: {e}"))?
        .unwrap_or_default();
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn write_view<R: Record>(
    run: &RunConfig,
    dash: &Dashboard<R, RestClient>,
) -> Result<(), String> {
    let bytes = output::render(run.output_format, dash.derived(), dash.selection());
    match run.output.as_ref() {
        Some(path) => {
            tokio::fs::write(path, &bytes)
                .await
                .map_err(|e| format!("failed to write output {}: {e}", path.display()))?;
            format_kv_line("Output", &path.display().to_string());
        }
        None => {
            let mut stdout = std::io::stdout();
            stdout
                .write_all(&bytes)
                .and_then(|_| stdout.flush())
                .map_err(|e| format!("failed to write output: {e}"))?;
        }
    }
    Ok(())
}

async fn load_fallback<R: Record>(run: &RunConfig) -> Result<Option<Vec<R>>, String> {
    let Some(path) = run.offline.as_ref() else {
        return Ok(None);
    };
    let dataset = MemoryBackend::from_file(path)
        .await
        .map_err(|e| e.to_string())?;
    Ok(Some(ingest(dataset.records(R::KIND))))
}

async fn run_bulk<R: Record>(
    run: &RunConfig,
    dash: &mut Dashboard<R, RestClient>,
    action: BulkAction,
) -> Result<(), String> {
    if run.select_all {
        dash.select_all();
    }
    for id in &run.ids {
        if !dash.select(id) && !dash.selection().contains(id) {
            print_notifications(&[Notification::warning(format!(
                "{} {id} is not in the filtered list, skipping",
                R::KIND.singular()
            ))]);
        }
    }
    let trigger = if !run.select_all && run.ids.len() == 1 {
        Trigger::Single
    } else {
        Trigger::Bulk
    };

    match dash.request_bulk(action, trigger) {
        Err(_) => {
            print_notifications(&dash.take_notifications());
            return Ok(());
        }
        Ok(Phase::Confirming) => {
            let question = dash
                .prompt()
                .map(|p| p.message)
                .unwrap_or_else(|| "Continue?".to_string());
            if !run.yes && !ask(&question).await? {
                dash.cancel_bulk();
                print_notifications(&[Notification::info("Cancelled")]);
                return Ok(());
            }
            dash.confirm_bulk().map_err(|e| e.to_string())?;
        }
        Ok(_) => {}
    }

    let total = dash.bulk_run().map(|r| r.total).unwrap_or(0) as u64;
    let bar = ProgressBar::new(total);
    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar.set_style(
        ProgressStyle::with_template(
            ":: Progress: [{pos}/{len}] :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let summary = dash
        .execute_bulk(|p| {
            bar.set_position(p.completed as u64);
            bar.set_message(format!("{:.0}%", p.fraction() * 100.0));
        })
        .await
        .map_err(|e| e.to_string())?;
    bar.finish_and_clear();

    print_notifications(&dash.take_notifications());
    for failure in &summary.failures {
        tracing::info!(id = %failure.id, error = %failure.error, "item failed");
    }
    if !summary.failures.is_empty() {
        return Err(format!(
            "{} of {} items failed",
            summary.failures.len(),
            summary.failures.len() + summary.successes.len()
        ));
    }
    Ok(())
}

async fn run_plan(
    run: &RunConfig,
    dash: &mut Dashboard<TestPlan, RestClient>,
    op: &PlanOp,
) -> Result<(), String> {
    let result = match op {
        PlanOp::Create { file } => {
            let draft = PlanDraft::from_file(file).await.map_err(|e| e.to_string())?;
            dash.create_plan(&draft).await.map(|p| {
                format_kv_line("Plan", &p.id);
            })
        }
        PlanOp::Update { id, file } => {
            let draft = PlanDraft::from_file(file).await.map_err(|e| e.to_string())?;
            dash.update_plan(id, &draft).await.map(|_| ())
        }
        PlanOp::Delete { id } => {
            let question = format!("Delete test plan {id}? This cannot be undone.");
            if !run.yes && !ask(&question).await? {
                print_notifications(&[Notification::info("Cancelled")]);
                return Ok(());
            }
            dash.delete_plan(id).await
        }
    };
    print_notifications(&dash.take_notifications());
    result.map_err(|e| e.to_string())
}

async fn run_view<R: Record>(run: &RunConfig, client: Arc<RestClient>) -> Result<(), String> {
    let mut dash: Dashboard<R, RestClient> =
        Dashboard::new(client, run.bulk.clone()).with_query(run.query.clone());
    if let Some(records) = load_fallback::<R>(run).await? {
        dash = dash.with_fallback(records);
    }

    if let Some(id) = run.get.as_deref() {
        let record = dash.fetch_record(id).await;
        print_notifications(&dash.take_notifications());
        let record = record.ok_or_else(|| format!("could not load {} {id}", R::KIND.singular()))?;
        let body = serde_json::to_string_pretty(&record)
            .map_err(|e| format!("failed to render {id}: {e}"))?;
        println!("{body}");
        return Ok(());
    }

    dash.refresh().await;
    print_notifications(&dash.take_notifications());

    if let Some(action) = run.action.clone() {
        run_bulk(run, &mut dash, action).await?;
    }

    write_view(run, &dash).await?;

    if let Some(every) = run.watch {
        format_kv_line("Watching", &format!("every {}s", every.as_secs()));
        let format = run.output_format;
        dash.watch(every, run.ticks, |view| {
            print_notifications(&view.take_notifications());
            let bytes = output::render(format, view.derived(), view.selection());
            let mut stdout = std::io::stdout();
            match stdout.write_all(&bytes).and_then(|_| stdout.flush()) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    tracing::warn!(error = %e, "stdout closed, stopping watch");
                    ControlFlow::Break(())
                }
            }
        })
        .await;
    }
    Ok(())
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    let quiet = run.output_format == OutputFormat::Json && run.output.is_none();
    if !quiet {
        print_banner();
        format_kv_line("API", &run.rest.base_url);
        format_kv_line("Kind", run.kind.plural());
        if !run.query.search.trim().is_empty() {
            format_kv_line("Search", run.query.search.trim());
        }
        if !run.query.filters.is_empty() {
            let parts = run
                .query
                .filters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .join(", ");
            format_kv_line("Filters", &parts);
        }
        if let Some(range) = run.query.date_range {
            format_kv_line("Dates", &format!("{} .. {}", range.start(), range.end()));
        }
        if let Some(action) = run.action.as_ref() {
            format_kv_line("Action", action.verb());
            format_kv_line("Confirm", format_bool(!run.yes));
        }
        if let Some(path) = run.offline.as_ref() {
            format_kv_line("Offline", &path.display().to_string());
        }
        println!();
    }

    let client = Arc::new(RestClient::new(&run.rest).map_err(|e| e.to_string())?);

    if let Some(op) = run.plan.clone() {
        let mut dash: Dashboard<TestPlan, RestClient> =
            Dashboard::new(client, run.bulk.clone()).with_query(run.query.clone());
        return run_plan(&run, &mut dash, &op).await;
    }

    match run.kind {
        RecordKind::TestCase => run_view::<TestCase>(&run, client).await,
        RecordKind::TestPlan => run_view::<TestPlan>(&run, client).await,
        RecordKind::TestResult => run_view::<TestResult>(&run, client).await,
    }
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                print!("{}", render_custom_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    if args.init_config {
        let path = args
            .config
            .as_deref()
            .map(config::expand_tilde)
            .or_else(config::default_config_path)
            .ok_or("could not determine a config path, pass --config")?;
        if config::ensure_default_config_file(&path)? {
            format_kv_line("Config", &format!("wrote {}", path.display()));
        } else {
            format_kv_line("Config", &format!("{} already exists", path.display()));
        }
        return Ok(());
    }

    let cfg = match args.config.as_deref().map(config::expand_tilde) {
        Some(path) => config::load_config(&path, false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;
    init_tracing(run.verbose);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))
}

#[cfg(test)]
mod cli_tests {
    use std::collections::BTreeMap;

    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> CliArgs {
        let mut full = vec!["kdash"];
        full.extend_from_slice(argv);
        CliArgs::parse_from(full)
    }

    #[test]
    fn defaults_without_config() {
        let run = build_run_config(parse(&[]), ConfigFile::default()).unwrap();
        assert_eq!(run.kind, RecordKind::TestCase);
        assert_eq!(run.bulk.concurrency, 1);
        assert_eq!(run.rest.retry.max_attempts, 3);
        assert_eq!(run.output_format, OutputFormat::Text);
        assert!(run.query.is_empty());
        assert!(run.watch.is_none());
    }

    #[test]
    fn cli_overrides_config() {
        let cfg = ConfigFile {
            api_url: Some("http://cfg.example/".to_string()),
            concurrency: Some(4),
            search: Some("boot".to_string()),
            filters: Some(BTreeMap::from([
                ("status".to_string(), "failed".to_string()),
                ("testType".to_string(), "unit".to_string()),
            ])),
            ..Default::default()
        };
        let run = build_run_config(
            parse(&["-u", "http://cli.example/", "-F", "status=completed", "-c", "2"]),
            cfg,
        )
        .unwrap();
        assert_eq!(run.rest.base_url, "http://cli.example/");
        assert_eq!(run.bulk.concurrency, 2);
        assert_eq!(run.query.search, "boot");
        assert_eq!(run.query.filters.get("status"), Some("completed"));
        assert_eq!(run.query.filters.get("test_type"), Some("unit"));
    }

    #[test]
    fn output_format_is_inferred_from_path() {
        let run = build_run_config(parse(&["-o", "cases.json"]), ConfigFile::default()).unwrap();
        assert_eq!(run.output_format, OutputFormat::Json);
        assert!(build_run_config(parse(&["-O", "xml"]), ConfigFile::default()).is_err());
    }

    #[test]
    fn watch_without_value_uses_poll_interval() {
        let cfg = ConfigFile {
            poll_interval: Some(15),
            ..Default::default()
        };
        let run = build_run_config(parse(&["--watch"]), cfg).unwrap();
        assert_eq!(run.watch, Some(Duration::from_secs(15)));
        let run = build_run_config(parse(&["--watch", "5"]), ConfigFile::default()).unwrap();
        assert_eq!(run.watch, Some(Duration::from_secs(5)));
    }

    #[test]
    fn plan_ops_imply_plan_kind() {
        let run = build_run_config(
            parse(&["--plan", "delete", "--plan-id", "p1"]),
            ConfigFile::default(),
        )
        .unwrap();
        assert_eq!(run.kind, RecordKind::TestPlan);
        assert_eq!(
            run.plan,
            Some(PlanOp::Delete {
                id: "p1".to_string()
            })
        );
        assert!(build_run_config(parse(&["--plan", "update", "--plan-id", "p1"]), ConfigFile::default()).is_err());
        assert!(build_run_config(
            parse(&["--plan", "delete", "--plan-id", "p1", "--kind", "cases"]),
            ConfigFile::default()
        )
        .is_err());
    }

    #[test]
    fn inverted_dates_are_rejected() {
        assert!(build_run_config(
            parse(&["--since", "2024-03-05", "--until", "2024-03-01"]),
            ConfigFile::default()
        )
        .is_err());
    }

    #[test]
    fn bulk_flags_build_an_action() {
        let run = build_run_config(
            parse(&["-a", "tag", "-T", "nightly", "-A", "-y"]),
            ConfigFile::default(),
        )
        .unwrap();
        assert_eq!(
            run.action,
            Some(BulkAction::Tag {
                tags: vec!["nightly".to_string()]
            })
        );
        assert!(run.select_all);
        assert!(run.yes);
    }

    #[test]
    fn help_lists_every_heading() {
        let help = render_custom_help();
        for heading in ["Input:", "Filters:", "Bulk:", "Plans:", "HTTP:", "Performance:", "Output:"] {
            assert!(help.contains(heading), "missing {heading}");
        }
    }
}
