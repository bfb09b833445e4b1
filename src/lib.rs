pub mod cli;
pub mod environment;
pub mod manifest;
pub mod probe;
pub mod search_path;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber on stderr.
///
/// `--debug` forces debug output for this crate; otherwise `RUST_LOG` is
/// honoured and warnings are shown by default.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("dk2nu_flux=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dk2nu_flux=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Run the command line interface and return an exit code.
pub fn run_cli() -> i32 {
    let cli = cli::Cli::parse();
    init_tracing(cli.debug);
    tracing::debug!("dk2nu-flux starting with args: {:?}", cli);

    exit_code(&cli)
}

/// Maps failures without a dedicated exit code to a generic one.
fn exit_code(cli: &cli::Cli) -> i32 {
    match cli::run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            cli::EXIT_GENERIC_FAILURE
        }
    }
}
