use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tally_cli::commands::{self, OutputFormat, RunSettings};
use tally_core::{StatOptions, UpdateMode};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("tally")
        .version(tally_core::VERSION)
        .about("Incremental statistics over record collections")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Attach stats to a record file and print their values")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Stats configuration (.json, .yaml or .yml)"),
                )
                .arg(
                    Arg::new("records")
                        .long("records")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Record file (JSON)"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_parser(["Disabled", "Manual", "OnAdd", "OnTimer"])
                        .help("Override the update mode of every stat"),
                )
                .arg(
                    Arg::new("format")
                        .long("format")
                        .default_value("text")
                        .value_parser(["text", "json"])
                        .help("Output format"),
                )
                .arg(
                    Arg::new("timer-period-ms")
                        .long("timer-period-ms")
                        .default_value("1000")
                        .value_parser(value_parser!(u64).range(1..))
                        .help("Flush period of OnTimer stats"),
                )
                .arg(
                    Arg::new("update-timeout-ms")
                        .long("update-timeout-ms")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Upper bound for waiting updates; 0 waits until settled"),
                ),
        )
        .subcommand(
            Command::new("convert")
                .about("Re-encode a stats configuration")
                .arg(
                    Arg::new("from")
                        .long("from")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("to")
                        .long("to")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a stats configuration")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn path<'a>(args: &'a ArgMatches, id: &str) -> Result<&'a PathBuf> {
    args.get_one::<PathBuf>(id)
        .ok_or_else(|| anyhow::anyhow!("missing --{id}"))
}

fn run(args: &ArgMatches) -> Result<()> {
    let mode = args
        .get_one::<String>("mode")
        .map(|m| m.parse::<UpdateMode>())
        .transpose()?;
    let format = args
        .get_one::<String>("format")
        .map_or(Ok(OutputFormat::Text), |f| f.parse::<OutputFormat>())?;
    let options = StatOptions::new()
        .with_timer_period_ms(args.get_one::<u64>("timer-period-ms").copied().unwrap_or(1000))
        .with_update_timeout_ms(args.get_one::<u64>("update-timeout-ms").copied().unwrap_or(0));

    let settings = RunSettings { mode, options };
    let reports = commands::run(path(args, "config")?, path(args, "records")?, &settings)?;
    print!("{}", commands::render(&reports, format)?);
    Ok(())
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => run(args),
        Some(("convert", args)) => {
            let count = commands::convert(path(args, "from")?, path(args, "to")?)?;
            println!("Converted {count} stats");
            Ok(())
        }
        Some(("check", args)) => {
            let count = commands::check(path(args, "config")?)?;
            println!("{count} stats OK");
            Ok(())
        }
        _ => unreachable!("subcommand is required"),
    }
}
