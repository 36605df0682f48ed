//! Battle scripts
//!
//! Parsing of the flat instruction format and the executor that drives the
//! battle routines from it.

pub mod executor;
pub mod parser;

pub use executor::{BattleRoutines, CommandExecutor, RunOutcome, RunReport};
pub use parser::{parameter_names, Command, RawInstruction, Script, ScriptEntry, ScriptError, Value};
