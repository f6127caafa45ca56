pub mod lower;
pub mod run;
pub mod validate;
