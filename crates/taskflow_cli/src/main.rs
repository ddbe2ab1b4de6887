//! Command-line probe for the task lifecycle engine.
//!
//! # Responsibility
//! - Expose status derivation and recurrence expansion without a database.
//! - Keep output deterministic, one value per line.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use taskflow_core::model::recurrence::{parse_weekday, weekday_label};
use taskflow_core::{
    apply_progress, expand_with_limit, init_logging, EngineConfig, RecurrenceKind, RecurrenceRule,
};

#[derive(Parser)]
#[command(name = "taskflow", version, about = "Task lifecycle engine probe")]
struct Cli {
    /// Absolute directory for rolling log files. Logging stays off when unset.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// Log level used with `--log-dir`.
    #[arg(long, global = true, default_value_t = taskflow_core::default_log_level().to_string())]
    log_level: String,

    /// Engine config as a camelCase JSON file.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the status derived from a progress value.
    Status {
        /// Progress percentage, 0 to 100.
        #[arg(allow_negative_numbers = true)]
        progress: i64,
    },
    /// Expand a recurrence rule into dated occurrences.
    Expand {
        #[arg(long, value_enum)]
        kind: KindArg,
        /// First date, YYYY-MM-DD.
        #[arg(long)]
        start: NaiveDate,
        /// Inclusive last date, YYYY-MM-DD.
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Comma separated weekdays for weekly rules, e.g. `월,수`.
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,
        /// Repeat without an end date, up to the per-call cap.
        #[arg(long)]
        indefinite: bool,
    },
    /// Print core and CLI versions.
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Weekdays,
}

impl From<KindArg> for RecurrenceKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Daily => Self::Daily,
            KindArg::Weekly => Self::Weekly,
            KindArg::Monthly => Self::Monthly,
            KindArg::Yearly => Self::Yearly,
            KindArg::Weekdays => Self::Weekdays,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        init_logging(&cli.log_level, log_dir).context("failed to start logging")?;
    }
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Status { progress } => {
            let choice = apply_progress(progress)?;
            println!("status={}", choice.status);
            println!("progress={}", choice.progress);
        }
        Command::Expand {
            kind,
            start,
            end,
            days,
            indefinite,
        } => {
            let rule = build_rule(kind.into(), end, &days, indefinite)?;
            let expansion = expand_with_limit(&rule, start, config.max_recurrence_instances)?;
            for occurrence in &expansion.occurrences {
                println!(
                    "{}\t{}\t{}",
                    occurrence.sequence,
                    occurrence.date,
                    weekday_label(occurrence.date.weekday())
                );
            }
            println!("count={}", expansion.len());
            println!("truncated={}", expansion.truncated);
        }
        Command::Version => {
            println!("taskflow_core ping={}", taskflow_core::ping());
            println!("taskflow_core version={}", taskflow_core::core_version());
            println!("taskflow version={}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config `{}`", path.display()))?;
    EngineConfig::from_json_str(&json).map_err(|err| anyhow!(err))
}

fn build_rule(
    kind: RecurrenceKind,
    end: Option<NaiveDate>,
    days: &[String],
    indefinite: bool,
) -> Result<RecurrenceRule> {
    let mut rule = match end {
        Some(end) => RecurrenceRule::until(kind, end),
        None if indefinite => RecurrenceRule::indefinite(kind),
        None => bail!("either --end or --indefinite is required"),
    };
    rule.indefinite = indefinite;
    if !days.is_empty() {
        let parsed = days
            .iter()
            .map(|label| parse_weekday(label).ok_or_else(|| anyhow!("unknown weekday `{label}`")))
            .collect::<Result<Vec<_>>>()?;
        rule = rule.with_days(parsed);
    }
    Ok(rule)
}
