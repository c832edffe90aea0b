//! migraph - Dependency-ordered migration of hosted content

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = migraph::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
