// commands/mod.rs
mod dispatcher;
mod validate;

pub use dispatcher::Dispatcher;
pub use validate::{Command, ValidationError, validate};
