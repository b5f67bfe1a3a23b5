use std::io::IsTerminal;

use anyhow::Result;

use relay::{
    cli::{ClientArgs, parse_or_exit},
    session::{Session, SessionEnd},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // stdout carries the conversation, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(args: ClientArgs) -> Result<SessionEnd> {
    let interactive = std::io::stdin().is_terminal();
    let session = Session::connect(&args.address, args.port)
        .await?
        .interactive(interactive);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let end = session.run(stdin, tokio::io::stdout()).await?;
    Ok(end)
}

#[tokio::main]
async fn main() {
    let args: ClientArgs = parse_or_exit();
    init_tracing();

    // Exit explicitly: a stdin read still parked on the blocking pool would
    // otherwise hold the runtime open after the server hangs up.
    let code = match run(args).await {
        Ok(end) => {
            tracing::debug!(?end, "session ended");
            0
        }
        Err(err) => {
            eprintln!("relay-client: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
