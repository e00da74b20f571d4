//! pty-server binary entry point.

use std::process::ExitCode;

use pty_server::cli::{self, Args};
use pty_server::server::{announce_port, shutdown_signal, Server};
use pty_server::{logging, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command-line arguments
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'pty-server --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }

    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

async fn run(args: Args) -> Result<(), ExitCode> {
    // Load configuration (CLI > env > file > defaults)
    let config = Config::load(&args).map_err(|e| {
        eprintln!("error: {}", e);
        ExitCode::from(2)
    })?;

    logging::init(config.log_filter(), config.logging.color);

    let server_config = config.to_server_config().map_err(|e| {
        error!("{}", e);
        ExitCode::from(2)
    })?;

    info!("pty-server v{}", env!("CARGO_PKG_VERSION"));

    let server = Server::bind(server_config).await.map_err(|e| {
        error!("{}", e);
        ExitCode::FAILURE
    })?;

    // The launcher reads this line; nothing else goes to stdout.
    announce_port(std::io::stdout(), server.port()).map_err(|e| {
        error!("failed to announce port: {}", e);
        ExitCode::FAILURE
    })?;

    server.run(shutdown_signal()).await.map_err(|e| {
        error!("server error: {}", e);
        ExitCode::FAILURE
    })?;

    info!("pty-server stopped");
    Ok(())
}
