use std::process::ExitCode;

use tracing::{error, info};

use relay::{
    cli::{ServerArgs, parse_or_exit},
    server::{Server, ServerConfig},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let ansi = std::io::IsTerminal::is_terminal(&std::io::stdout());
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: ServerArgs = parse_or_exit();
    init_tracing();

    let config = ServerConfig::from(args);
    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(err) => {
            error!("{:#}", anyhow::Error::from(err));
            return ExitCode::FAILURE;
        }
    };

    match server.local_addr() {
        Ok(addr) => info!("relay listening on {}", addr),
        Err(err) => {
            error!(error = ?err, "listening socket has no local address");
            return ExitCode::FAILURE;
        }
    }

    if let Err(err) = server.run_until_ctrl_c().await {
        error!("relay exited with error: {:#}", anyhow::Error::from(err));
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
