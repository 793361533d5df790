//! Spry host: the `spry` command.

use spry_core::RequestContext;
use std::process::ExitCode;

fn main() -> ExitCode {
    spry_cli::main_with(RequestContext::new())
}
