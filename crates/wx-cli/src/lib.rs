use std::ffi::OsString;
use std::io::Write;
use std::str::FromStr;

use clap::Parser;
use log::{debug, LevelFilter};
use wx_core::Messaging;

mod cli_args;
mod commands;
mod config;
mod error_map;
mod source_loader;

pub(crate) use cli_args::{Cli, Command, CommonArgs};
pub(crate) use error_map::{emit_error, exit_code, CliError};

/// Log target of the diagnostics sink; its records are printed bare.
const MESSAGING_TARGET: &str = "wx_core::messaging";

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    init_logging(&cli.common.log_level);
    debug!("parsed arguments: {:?}", cli);

    let config = match config::load_config(cli.common.config.as_deref()) {
        Ok(config) => config,
        Err(error) => return emit_error(&Messaging::default(), CliError::Wix(error)),
    };
    let mut policy = config.messages.policy();
    policy.suppressed.extend(cli.common.suppress.iter().copied());
    policy.elevated.extend(cli.common.elevate.iter().copied());
    policy.suppress_all_warnings |= cli.common.suppress_all;
    policy.warnings_as_errors |= cli.common.elevate_all;
    let messaging = Messaging::new(policy);

    match run(&cli, &config, &messaging) {
        Ok(()) => exit_code(&messaging),
        Err(error) => emit_error(&messaging, error),
    }
}

fn run(cli: &Cli, config: &config::WxConfig, messaging: &Messaging) -> Result<(), CliError> {
    match &cli.command {
        Command::Compile(args) => commands::run_compile(args, config, messaging),
        Command::Lib(args) => commands::run_lib(args, config, messaging),
        Command::Link(args) => commands::run_link(args, &cli.common, config, messaging),
        Command::Diff(args) => commands::run_diff(args, config, messaging),
    }
}

/// Diagnostics always reach stderr as `file(line) : error WX0000: text`;
/// `level` only governs progress logging.
fn init_logging(level: &str) {
    let level = LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("Invalid log level: {}. Using 'warn' instead.", level);
        LevelFilter::Warn
    });
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .filter_module(MESSAGING_TARGET, LevelFilter::Warn)
        .format(|buf, record| {
            if record.target() == MESSAGING_TARGET {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
            }
        })
        .try_init();
}
