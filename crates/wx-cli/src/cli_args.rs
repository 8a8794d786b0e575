use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "wx")]
#[command(about = "Compile, link and bind XML installer sources")]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Args)]
pub(crate) struct CommonArgs {
    /// Suppress warning N. Repeatable.
    #[arg(long = "sw", value_name = "N", global = true)]
    pub(crate) suppress: Vec<u32>,
    #[arg(long = "sw-all", global = true)]
    pub(crate) suppress_all: bool,
    /// Treat warning N as an error. Repeatable.
    #[arg(long = "wx", value_name = "N", global = true)]
    pub(crate) elevate: Vec<u32>,
    #[arg(long = "wx-all", global = true)]
    pub(crate) elevate_all: bool,
    #[arg(long = "pedantic", global = true)]
    pub(crate) pedantic: bool,
    #[arg(long = "config", global = true)]
    pub(crate) config: Option<PathBuf>,
    #[arg(long = "log-level", default_value = "warn", global = true)]
    pub(crate) log_level: String,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Preprocess and compile sources into objects.
    Compile(CompileArgs),
    /// Combine objects into a library.
    Lib(LibArgs),
    /// Link objects and libraries, then bind the package.
    Link(LinkArgs),
    /// Create a transform between two linked outputs.
    Diff(DiffArgs),
}

#[derive(Debug, Args)]
pub(crate) struct CompileArgs {
    #[arg(required = true)]
    pub(crate) sources: Vec<PathBuf>,
    /// Directory receiving one `.wixobj` per source.
    #[arg(short = 'o', long = "out")]
    pub(crate) out: PathBuf,
    /// Preprocessor variable, `name=value` or `name`.
    #[arg(short = 'd', long = "define", value_name = "NAME=VALUE")]
    pub(crate) defines: Vec<String>,
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub(crate) include_paths: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub(crate) struct LibArgs {
    #[arg(required = true)]
    pub(crate) inputs: Vec<PathBuf>,
    #[arg(short = 'o', long = "out")]
    pub(crate) out: PathBuf,
    #[arg(long = "loc", value_name = "FILE")]
    pub(crate) localizations: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputKind {
    Product,
    Module,
}

#[derive(Debug, Args)]
pub(crate) struct LinkArgs {
    #[arg(required = true)]
    pub(crate) inputs: Vec<PathBuf>,
    /// Package path. A `.wixout` path stops after linking.
    #[arg(short = 'o', long = "out")]
    pub(crate) out: PathBuf,
    /// Bind path, `dir` or `name=dir`. Repeatable.
    #[arg(short = 'b', long = "bind-path", value_name = "PATH")]
    pub(crate) bind_paths: Vec<String>,
    #[arg(long = "cab-cache", value_name = "DIR")]
    pub(crate) cabinet_cache: Option<PathBuf>,
    #[arg(long = "cab-threads", value_name = "N")]
    pub(crate) cabinet_threads: Option<usize>,
    #[arg(long = "culture")]
    pub(crate) culture: Option<String>,
    #[arg(long = "loc", value_name = "FILE")]
    pub(crate) localizations: Vec<PathBuf>,
    #[arg(long = "no-tidy")]
    pub(crate) no_tidy: bool,
    #[arg(long = "output-type", value_enum, default_value = "product")]
    pub(crate) output_type: OutputKind,
    /// Also save the bound output for later diffing.
    #[arg(long = "wixout", value_name = "FILE")]
    pub(crate) wixout: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub(crate) struct DiffArgs {
    pub(crate) target: PathBuf,
    pub(crate) updated: PathBuf,
    #[arg(short = 'o', long = "out")]
    pub(crate) out: PathBuf,
    #[arg(long = "preserve-unchanged")]
    pub(crate) preserve_unchanged: bool,
    /// Transform flags, decimal or `0x` hex.
    #[arg(long = "flags", value_parser = parse_flags)]
    pub(crate) flags: Option<u32>,
    /// Where target payloads are found, `dir` or `name=dir`.
    #[arg(long = "target-bind-path", value_name = "PATH")]
    pub(crate) target_bind_paths: Vec<String>,
    /// Where updated payloads are found, `dir` or `name=dir`.
    #[arg(long = "updated-bind-path", value_name = "PATH")]
    pub(crate) updated_bind_paths: Vec<String>,
}

pub(crate) fn parse_flags(raw: &str) -> Result<u32, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    parsed.map_err(|error| format!("invalid transform flags '{}': {}", raw, error))
}
