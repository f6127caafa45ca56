//! Command line front-end of the interface tools: validation and lowering of interface files, and
//! the protocol engine running a program between a driver and the interface.

#[macro_use]
extern crate log;

pub mod error;
pub mod opt;
pub mod tools;

pub use opt::*;
