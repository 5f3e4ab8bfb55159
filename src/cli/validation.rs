use std::sync::OnceLock;

use regex::Regex;

use crate::cli::args::CliArgs;

static TAG: OnceLock<Option<Regex>> = OnceLock::new();

fn valid_tag(tag: &str) -> bool {
    TAG.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:/-]{0,63}$").ok())
        .as_ref()
        .map(|re| re.is_match(tag))
        .unwrap_or(false)
}

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(kind) = args.kind.as_deref() {
        if crate::record::RecordKind::parse(kind).is_none() {
            return Err(format!(
                "invalid --kind '{kind}', expected cases, plans or results"
            ));
        }
    }
    for tag in &args.tag {
        if !valid_tag(tag) {
            return Err(format!("invalid --tag '{tag}'"));
        }
    }
    if !args.tag.is_empty() && args.action.as_deref().map(str::trim) != Some("tag") {
        return Err("--tag is only used with --action tag".to_string());
    }
    if args.action.is_some() && args.id.is_empty() && !args.select_all {
        return Err("--action needs a selection (--id or --select-all)".to_string());
    }
    if args.action.is_some() && args.plan.is_some() {
        return Err("use either --action or --plan, not both".to_string());
    }
    if let Some(c) = args.concurrency {
        if c == 0 {
            return Err("invalid concurrency, expected positive integer".to_string());
        }
    }
    if let Some(rate) = args.rate {
        if rate == 0 {
            return Err("invalid rate, expected positive integer".to_string());
        }
    }
    if let Some(retries) = args.retries {
        if retries == 0 {
            return Err("invalid retries, expected at least 1 attempt".to_string());
        }
    }
    if args.ticks.is_some() && args.watch.is_none() {
        return Err("--ticks is only used with --watch".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn args(argv: &[&str]) -> CliArgs {
        let mut full = vec!["kdash"];
        full.extend_from_slice(argv);
        CliArgs::parse_from(full)
    }

    #[test]
    fn tags_are_checked() {
        assert!(valid_tag("nightly"));
        assert!(valid_tag("arch:x86_64"));
        assert!(!valid_tag("has space"));
        assert!(!valid_tag("-leading"));
        assert!(validate(&args(&["-a", "tag", "-T", "bad tag", "-A"])).is_err());
        assert!(validate(&args(&["-a", "tag", "-T", "smoke", "-A"])).is_ok());
    }

    #[test]
    fn action_needs_selection() {
        assert!(validate(&args(&["--action", "execute"])).is_err());
        assert!(validate(&args(&["--action", "execute", "--id", "t1"])).is_ok());
    }

    #[test]
    fn rejects_unknown_kind_and_zero_limits() {
        assert!(validate(&args(&["--kind", "suites"])).is_err());
        assert!(validate(&args(&["--concurrency", "0"])).is_err());
        assert!(validate(&args(&["--rate", "0"])).is_err());
        assert!(validate(&args(&["--ticks", "2"])).is_err());
        assert!(validate(&args(&["--watch", "--ticks", "2"])).is_ok());
    }
}
