//! treactor CLI: molecule validation and the reactor service.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "treactor",
    version,
    about = "Synthetic distributed-call workload generator driven by molecule expressions"
)]
struct Cli {
    #[command(subcommand)]
    command: treactor::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = treactor::cli::dispatch(cli.command) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
