use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use turingarena_driver::EngineConfig;

#[derive(Parser, Debug)]
#[clap(
    name = "turingarena",
    about = "Check interface files and run programs against them"
)]
pub struct Opt {
    #[clap(flatten)]
    pub logger: LoggerOpt,

    /// Which tool to use
    #[clap(subcommand)]
    pub tool: Tool,
}

#[derive(Subcommand, Debug)]
pub enum Tool {
    /// Parse an interface file and report all its problems
    Validate(ValidateOpt),
    /// Print the lowered main block of an interface, as executed by the protocol engine
    Lower(LowerOpt),
    /// Run a program against an interface, serving the driver requests from stdin.
    ///
    /// The responses to the driver are written to stdout, the summary of the run to stderr.
    Run(RunOpt),
}

#[derive(Args, Debug, Clone)]
pub struct LoggerOpt {
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateOpt {
    /// Path of the interface file
    pub interface: PathBuf,

    /// Print the diagnostics in JSON format
    #[clap(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LowerOpt {
    /// Path of the interface file
    pub interface: PathBuf,

    /// Print the lowered program in JSON format
    #[clap(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunOpt {
    /// Path of the interface file
    pub interface: PathBuf,

    /// Time to wait for a line from the program before killing it, in milliseconds
    #[clap(long, default_value = "3000")]
    pub upward_timeout: u64,

    /// Time given to the program to exit by itself at the end of the run, in milliseconds
    #[clap(long, default_value = "1000")]
    pub stop_grace: u64,

    /// Maximum number of array cells the run can create, in all the arrays
    #[clap(long, default_value = "16777216")]
    pub max_array_cells: usize,

    /// Print the summary of the run in JSON format
    #[clap(long)]
    pub json: bool,

    /// The program to run, with its arguments
    #[clap(required = true, last = true)]
    pub command: Vec<String>,
}

impl RunOpt {
    /// Make an `EngineConfig` from this command line options.
    pub fn to_config(&self) -> EngineConfig {
        EngineConfig {
            upward_timeout: Duration::from_millis(self.upward_timeout),
            stop_grace: Duration::from_millis(self.stop_grace),
            max_array_cells: self.max_array_cells,
        }
    }
}

impl LoggerOpt {
    pub fn enable_log(&self) {
        if self.verbose > 0 {
            std::env::set_var("RUST_BACKTRACE", "1");
            match self.verbose {
                0 => unreachable!(),
                1 => std::env::set_var("RUST_LOG", "info"),
                2 => std::env::set_var("RUST_LOG", "debug"),
                _ => std::env::set_var("RUST_LOG", "trace"),
            }
        }

        env_logger::Builder::from_default_env()
            .format_timestamp_nanos()
            .init();
        better_panic::install();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_opt_is_consistent() {
        Opt::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let opt = Opt::parse_from([
            "turingarena",
            "-vv",
            "run",
            "--upward-timeout",
            "500",
            "interface.txt",
            "--",
            "./solution",
            "--fast",
        ]);
        assert_eq!(opt.logger.verbose, 2);
        let Tool::Run(run) = opt.tool else {
            panic!("expecting the run tool");
        };
        assert_eq!(run.interface, PathBuf::from("interface.txt"));
        assert_eq!(run.command, vec!["./solution", "--fast"]);
        let config = run.to_config();
        assert_eq!(config.upward_timeout, Duration::from_millis(500));
        assert_eq!(config.stop_grace, Duration::from_secs(1));
        assert_eq!(
            config,
            EngineConfig {
                upward_timeout: Duration::from_millis(500),
                ..EngineConfig::default()
            }
        );
    }
}
