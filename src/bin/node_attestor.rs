use clap::Parser;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::Api;
use log::{error, info};

use spire_k8s::{
    attest::Attestor, client::build_client, config::AttestorArgs, identity::IdentityStore, Error,
};

async fn run(args: AttestorArgs) -> Result<(), Error> {
    let agent_name = args.agent_name()?;
    info!("using agent name {agent_name} for the identity document");

    let store = IdentityStore::open(&args.id_dir)?;
    let client = build_client(&args).await?;
    let api: Api<CertificateSigningRequest> = Api::all(client);

    Attestor::new(api, store, agent_name)
        .with_retry(args.retry())
        .with_approval_timeout(args.approval_timeout())
        .run()
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();
    let args = AttestorArgs::parse();

    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}
