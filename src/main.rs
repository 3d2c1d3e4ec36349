use clap::Parser;

use config_agent::{cli, commands};

fn main() {
    let args = cli::Args::parse();

    if let Err(e) = commands::run_command(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
