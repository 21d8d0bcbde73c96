//! `prd` binary entry point.

#![allow(clippy::print_stdout)]

use anyhow::{Result, bail};
use clap::Parser;

use prd_cli::{Cli, Commands, release, render};

fn main() -> Result<()> {
    let cli = Cli::parse();
    prd_telemetry::init_tracing(cli.verbose)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Release(args) => {
                let report = release(&args).await?;
                print!("{}", render(&report, args.format)?);
                if !report.is_clean() {
                    bail!("{} object(s) failed to release", report.failures.len());
                }
                Ok(())
            }
        }
    })
}
