use clap::Parser;
use log::error;

use spire_k8s::{config::MediatorArgs, webhook};

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();
    let args = MediatorArgs::parse();

    if let Err(e) = webhook::run_webhook(&args).await {
        error!("webhook failed to run: {e}");
        std::process::exit(1);
    }
}
