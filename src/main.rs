use clap::Parser;

use turingarena_rust::error::NiceError;
use turingarena_rust::opt::{Opt, Tool};
use turingarena_rust::tools::lower::main_lower;
use turingarena_rust::tools::run::main_run;
use turingarena_rust::tools::validate::main_validate;

fn main() {
    let base_opt = Opt::parse();
    base_opt.logger.enable_log();

    match base_opt.tool {
        Tool::Validate(opt) => main_validate(opt),
        Tool::Lower(opt) => main_lower(opt),
        Tool::Run(opt) => main_run(opt),
    }
    .nice_unwrap()
}
