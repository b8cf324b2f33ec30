mod capture;
mod cli;
mod commands;
mod config;
mod context;
mod error;
mod executor;
mod logs;
mod paths;
mod process;
mod registry;
mod report;
mod scheduler;
mod telemetry;

fn main() {
    if let Err(err) = telemetry::init_logging() {
        eprintln!("warning: {err:#}");
    }

    if let Err(err) = cli::run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
