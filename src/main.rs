use clap::Parser;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ethics_chat::cli::Args;
use ethics_chat::terminal::{self, TerminalUi};
use ethics_chat::transport::Transports;
use ethics_chat::web::{self, SseUi};
use ethics_chat::{Backend, ChatController};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ethics_chat=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let config = args.resolve_config()?;

    if !config.has_remote_credentials() {
        warn!("no OpenRouter key (OPENROUTER_KEY); the remote backend will answer with an error");
    }
    let transports = Transports::from_config(&config);
    info!(
        backend = %args.backend,
        local_model = %config.local_model,
        remote_model = %config.remote_model,
        remote = transports.supports(Backend::Remote),
        "starting"
    );

    if args.terminal {
        let controller = ChatController::new(TerminalUi::stdout(), transports, args.backend);
        return terminal::run(controller).await;
    }

    let controller = ChatController::new(SseUi::default(), transports, args.backend);
    web::serve(args.port, Arc::new(Mutex::new(controller)), !args.no_open).await
}
