//! Library half of the `tipflow` binary: argument parsing, amount units, and
//! subcommand execution.

pub mod amount;
pub mod cli;
pub mod commands;

pub use amount::{format_amount, parse_amount, AmountError};
pub use cli::{Cli, Command};
pub use commands::{execute, render_status, CliError};
