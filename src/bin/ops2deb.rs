//! `ops2deb` binary entrypoint: parses the CLI, wires up logging, and hands
//! off to the orchestrator, racing it against SIGINT.

use clap::Parser;
use ops2deb::cli::Cli;
use ops2deb::env::Environment;
use ops2deb::orchestrator;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut env = Environment::from_process_env();
    if cli.verbose {
        env.verbose = true;
    }

    init_logging(env.verbose);

    let run = orchestrator::run(cli, env);
    tokio::pin!(run);

    let code = tokio::select! {
        code = &mut run => code,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted, shutting down");
            orchestrator::EXIT_INTERRUPTED
        }
    };

    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}
