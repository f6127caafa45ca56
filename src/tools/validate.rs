use anyhow::{bail, Context, Error};
use colored::Colorize;

use turingarena_interface::InterfaceDefinition;

use crate::opt::ValidateOpt;

pub fn main_validate(opt: ValidateOpt) -> Result<(), Error> {
    let source = std::fs::read_to_string(&opt.interface)
        .with_context(|| format!("Cannot read interface file {}", opt.interface.display()))?;
    let (_, diagnostics) = InterfaceDefinition::parse(&source).context("Cannot parse the interface")?;
    if opt.json {
        let json = serde_json::to_string(&diagnostics).context("Non-serializable diagnostics")?;
        println!("{}", json);
    } else if diagnostics.is_empty() {
        println!("{}", "The interface is valid".green().bold());
    } else {
        print!("{}", diagnostics);
    }
    if diagnostics.has_errors() {
        bail!("The interface {} is not valid", opt.interface.display());
    }
    Ok(())
}
