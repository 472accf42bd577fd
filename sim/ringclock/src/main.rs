use ringclock::cli::initialize_from_arguments;
use std::{env, process::ExitCode};

/// Without `--id`, main starts every machine of the ring
#[tokio::main]
async fn main() -> ExitCode {
    println!("Ringclock v{}", env!("CARGO_PKG_VERSION"));
    match initialize_from_arguments().await {
        Ok(()) => {
            println!("Done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
