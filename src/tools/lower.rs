use anyhow::{Context, Error};

use turingarena_interface::InterfaceDefinition;

use crate::opt::LowerOpt;

pub fn main_lower(opt: LowerOpt) -> Result<(), Error> {
    let interface =
        InterfaceDefinition::from_file(&opt.interface).context("Cannot load the interface")?;
    let program = interface.lower();
    if opt.json {
        let json = serde_json::to_string(&program).context("Non-serializable program")?;
        println!("{}", json);
    } else {
        print!("{}", program);
    }
    Ok(())
}
