use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kdash",
    version,
    about = "kernel test dashboard client",
    long_about = "kdash lists, filters and bulk-manages test cases, test plans and test results on a kernel test-orchestration backend.\n\nExamples:\n  kdash --kind cases --filter test_type=unit --search boot\n  kdash --kind cases --select-all --filter status=failed --action execute\n  kdash --kind cases --id t1 --id t2 --action export --export-dir ./exports\n  kdash --kind plans --plan create --plan-file ./nightly.yml\n  kdash --offline ./dataset.json --watch 30\n\nTip: Use --init-config to write ~/.kdash/config.yml and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "vb",
        visible_alias = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase log verbosity (-v, -vv, -vvv)."
    )]
    pub verbose: u8,

    #[arg(
        short = 'C',
        long = "cfg",
        visible_alias = "config",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.kdash/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        long = "ic",
        visible_alias = "init-config",
        help_heading = "Input",
        help = "Write a default config file (if missing) and exit."
    )]
    pub init_config: bool,

    #[arg(
        short = 'u',
        long = "api",
        visible_alias = "api-url",
        value_name = "URL",
        help_heading = "Input",
        help = "Backend base URL (default http://localhost:8000/)."
    )]
    pub api_url: Option<String>,

    #[arg(
        short = 'k',
        long = "kind",
        value_name = "KIND",
        help_heading = "Input",
        help = "Record type to show: cases, plans or results."
    )]
    pub kind: Option<String>,

    #[arg(
        long = "off",
        visible_alias = "offline",
        value_name = "FILE",
        help_heading = "Input",
        help = "JSON dataset shown when the backend is unreachable (same shape as an export)."
    )]
    pub offline: Option<String>,

    #[arg(
        long = "get",
        value_name = "ID",
        help_heading = "Input",
        help = "Show a single record by id."
    )]
    pub get: Option<String>,

    #[arg(
        short = 's',
        long = "q",
        visible_alias = "search",
        value_name = "TEXT",
        help_heading = "Filters",
        help = "Case-insensitive search over names and descriptions."
    )]
    pub search: Option<String>,

    #[arg(
        short = 'F',
        long = "flt",
        visible_alias = "filter",
        value_name = "KEY=VALUE",
        action = ArgAction::Append,
        help_heading = "Filters",
        help = "Exact-match filter on a field (repeatable, e.g. --filter status=failed)."
    )]
    pub filter: Vec<String>,

    #[arg(
        long = "since",
        value_name = "YYYY-MM-DD",
        help_heading = "Filters",
        help = "Only records created on or after this day."
    )]
    pub since: Option<String>,

    #[arg(
        long = "until",
        value_name = "YYYY-MM-DD",
        help_heading = "Filters",
        help = "Only records created on or before this day."
    )]
    pub until: Option<String>,

    #[arg(
        short = 'a',
        long = "act",
        visible_alias = "action",
        value_name = "ACTION",
        help_heading = "Bulk",
        help = "Bulk action on the selection: execute, delete, tag or export."
    )]
    pub action: Option<String>,

    #[arg(
        short = 'i',
        long = "id",
        value_name = "ID",
        action = ArgAction::Append,
        help_heading = "Bulk",
        help = "Select a record by id (repeatable)."
    )]
    pub id: Vec<String>,

    #[arg(
        short = 'A',
        long = "sa",
        visible_alias = "select-all",
        help_heading = "Bulk",
        help = "Select every record in the filtered list."
    )]
    pub select_all: bool,

    #[arg(
        short = 'T',
        long = "tag",
        value_name = "TAG",
        action = ArgAction::Append,
        help_heading = "Bulk",
        help = "Tag to apply with --action tag (repeatable)."
    )]
    pub tag: Vec<String>,

    #[arg(
        short = 'y',
        long = "yes",
        help_heading = "Bulk",
        help = "Answer yes to confirmation prompts."
    )]
    pub yes: bool,

    #[arg(
        short = 'E',
        long = "ed",
        visible_alias = "export-dir",
        value_name = "DIR",
        help_heading = "Bulk",
        help = "Directory for export files (default: current directory)."
    )]
    pub export_dir: Option<String>,

    #[arg(
        long = "plan",
        value_name = "OP",
        help_heading = "Plans",
        help = "Plan operation: create, update or delete."
    )]
    pub plan: Option<String>,

    #[arg(
        long = "pf",
        visible_alias = "plan-file",
        value_name = "FILE",
        help_heading = "Plans",
        help = "YAML or JSON plan draft for create/update."
    )]
    pub plan_file: Option<String>,

    #[arg(
        long = "pid",
        visible_alias = "plan-id",
        value_name = "ID",
        help_heading = "Plans",
        help = "Plan id for update/delete."
    )]
    pub plan_id: Option<String>,

    #[arg(
        long = "timeout",
        value_name = "SECONDS",
        help_heading = "HTTP",
        help = "Request timeout in seconds."
    )]
    pub timeout: Option<usize>,

    #[arg(
        short = 'x',
        long = "px",
        visible_alias = "proxy",
        value_name = "URL",
        help_heading = "HTTP",
        help = "HTTP proxy URL."
    )]
    pub proxy: Option<String>,

    #[arg(
        short = 'H',
        long = "hdr",
        visible_alias = "header",
        value_name = "HEADER",
        help_heading = "HTTP",
        help = "Extra request header (\"Key: Value\")."
    )]
    pub header: Option<String>,

    #[arg(
        long = "rty",
        visible_alias = "retries",
        value_name = "N",
        help_heading = "HTTP",
        help = "Attempts for list/get requests (1 disables retries)."
    )]
    pub retries: Option<u32>,

    #[arg(
        short = 'c',
        long = "cc",
        visible_alias = "concurrency",
        value_name = "N",
        help_heading = "Performance",
        help = "Bulk item calls in flight at once (default 1, sequential)."
    )]
    pub concurrency: Option<usize>,

    #[arg(
        short = 'r',
        long = "rt",
        visible_alias = "rate",
        value_name = "RPS",
        help_heading = "Performance",
        help = "Bulk item calls per second."
    )]
    pub rate: Option<u32>,

    #[arg(
        short = 'o',
        long = "out",
        visible_alias = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write the list to a file instead of stdout."
    )]
    pub output: Option<String>,

    #[arg(
        short = 'O',
        long = "of",
        visible_alias = "output-format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Output format: text or json (inferred from --output when omitted)."
    )]
    pub output_format: Option<String>,

    #[arg(
        long = "nc",
        visible_alias = "no-color",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'w',
        long = "wt",
        visible_alias = "watch",
        value_name = "SECONDS",
        num_args = 0..=1,
        default_missing_value = "0",
        help_heading = "Output",
        help = "Keep polling the backend (interval from config when no value is given)."
    )]
    pub watch: Option<u64>,

    #[arg(
        long = "ticks",
        value_name = "N",
        help_heading = "Output",
        help = "Stop --watch after N refreshes."
    )]
    pub ticks: Option<usize>,
}
