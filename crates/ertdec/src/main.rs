use clap::Parser;
use log::{error, LevelFilter};

mod app;
mod cli;
mod output;
mod rtltcp;

use cli::Args;

fn main() {
    // clap exits with status 2 on usage errors and 0 for --help and
    // --version.
    let args = Args::parse();
    log_setup(&args);

    if let Err(e) = app::run(args) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn log_setup(args: &Args) {
    if args.quiet {
        // no logging
        return;
    } else if std::env::var_os("RUST_LOG").is_none() {
        // parameter controls
        let log_filter = match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        pretty_env_logger::formatted_builder()
            .filter_module("ertrx", log_filter)
            .filter_module("ertdec", log_filter)
            .init();
    } else {
        // environment controls
        pretty_env_logger::init();
    }
}
