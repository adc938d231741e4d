use std::ffi::OsString;
use std::path::{Path, PathBuf};
use clap::{ArgAction, Parser, Subcommand};

/// Prefix that turns the program name into an implicit `install <tool>`.
const INSTALL_ALIAS_PREFIX: &str = "install_";

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    #[command(subcommand)]
    pub(crate) command: ToolstallCommand,
    /// More log output (-v debug, -vv trace)
    #[clap(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Only warnings and errors
    #[clap(short, long, global = true, conflicts_with = "verbose")]
    pub(crate) quiet: bool,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ToolstallCommand {
    /// Installs a tool. Defaults to the latest release in the user bin directory
    Install {
        /// Name of the tool, see `toolstall list`
        tool: String,
        /// Version or tag to install ("latest" or empty for the newest release)
        #[clap(env = "VERSION", default_value = "latest")]
        version: String,
        /// Directory that receives the executable
        #[clap(env = "INSTALL_DIR")]
        install_dir: Option<PathBuf>,
    },
    /// List all known tools
    List {
        /// Also show where each tool comes from
        #[clap(short, long)]
        long: bool,
    },
    /// Searches GitHub releases of a tool and outputs the available versions
    Search {
        tool: String,
    },
}

impl CLI {
    /// Default log filter for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

/// Rewrites `install_<tool> [args...]` into `toolstall install <tool> [args...]`.
/// Any other invocation is returned unchanged.
pub fn args_from_invocation<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let tool = args
        .first()
        .and_then(|argv0| Path::new(argv0).file_name())
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(INSTALL_ALIAS_PREFIX))
        .filter(|tool| !tool.is_empty())
        .map(str::to_string);
    match tool {
        Some(tool) => {
            let mut rewritten = vec![OsString::from("toolstall"), OsString::from("install"), OsString::from(tool)];
            rewritten.extend(args.into_iter().skip(1));
            rewritten
        }
        None => args,
    }
}
