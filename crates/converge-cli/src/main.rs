mod args;
mod runner;

use clap::Parser;
use converge_core::ConvergeError;
use tokio::runtime::Builder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use args::Cli;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    let result = runtime.block_on(runner::run(cli));

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(extract_exit_code(&e));
    }
}

fn init_tracing(verbose: bool, debug: bool) {
    let default = if debug {
        "trace"
    } else if verbose {
        "converge=debug,info"
    } else {
        "converge=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn extract_exit_code(e: &ConvergeError) -> i32 {
    match e.inner_error() {
        ConvergeError::ConfigError { .. } | ConvergeError::PolicyError { .. } => 2,
        _ => 1,
    }
}
