mod cli;
mod execute;

use std::io::IsTerminal;
use std::process::ExitCode;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use toolstall::error::InstallError;
use toolstall::fetch::install_interrupt_handler;
use crate::cli::{args_from_invocation, CLI};

fn main() -> ExitCode {
    let cli = match CLI::try_parse_from(args_from_invocation(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(cli.log_level());

    let result = install_interrupt_handler().and_then(|()| execute::execute(cli));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(install_error(&e).map(InstallError::exit_code).unwrap_or(1))
        }
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_env("TOOLSTALL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

/// Prints `error[<stage>]: <message>` and the context chain.
fn report(error: &anyhow::Error) {
    if !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
    let install_error = install_error(error);
    if let Some(e) = install_error {
        tracing::debug!(category = %e.category(), stage = e.stage(), "install failed");
    }
    let stage = install_error.map(InstallError::stage).unwrap_or("toolstall");
    eprintln!("{} {}", format!("error[{stage}]:").red().bold(), error);
    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".yellow(), cause);
    }
}

fn install_error(error: &anyhow::Error) -> Option<&InstallError> {
    error.chain().find_map(|cause| cause.downcast_ref::<InstallError>())
}
