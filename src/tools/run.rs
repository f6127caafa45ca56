use std::io::BufReader;
use std::process::Command;

use anyhow::{bail, Context, Error};
use colored::Colorize;

use turingarena_driver::{run_interface, DriverConnection, RunOutcome, RunSummary};
use turingarena_interface::InterfaceDefinition;

use crate::opt::RunOpt;

fn print_summary(summary: &RunSummary) {
    let outcome = match &summary.outcome {
        RunOutcome::Completed | RunOutcome::Stopped => summary.outcome.to_string().green(),
        outcome => outcome.to_string().red(),
    };
    eprintln!("{} {}", "Outcome:".bold(), outcome);
    eprintln!("{} {}", "Program:".bold(), summary.process.message);
    eprintln!(
        "{} {:.3}s, {} KiB peak memory",
        "Resources:".bold(),
        summary.process.time_usage,
        summary.process.peak_memory_usage / 1024
    );
}

pub fn main_run(opt: RunOpt) -> Result<(), Error> {
    let interface =
        InterfaceDefinition::from_file(&opt.interface).context("Cannot load the interface")?;
    let (program, args) = opt
        .command
        .split_first()
        .context("Missing the program to run")?;
    let mut command = Command::new(program);
    command.args(args);

    let driver = DriverConnection::new(
        Box::new(BufReader::new(std::io::stdin())),
        Box::new(std::io::stdout()),
    );
    let summary = run_interface(&interface, &mut command, driver, &opt.to_config())
        .with_context(|| format!("Cannot run {}", program))?;

    if opt.json {
        let json = serde_json::to_string(&summary).context("Non-serializable summary")?;
        eprintln!("{}", json);
    } else {
        print_summary(&summary);
    }
    match summary.outcome {
        RunOutcome::Completed | RunOutcome::Stopped => Ok(()),
        outcome => bail!("The run failed: {}", outcome),
    }
}
