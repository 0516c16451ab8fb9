use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use log::info;

use crate::{config::AttestorArgs, Error};

/// The explicit kubeconfig if given, otherwise `$HOME/.kube/config`.
pub fn resolve_kubeconfig_path(explicit: Option<&Path>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(path) = explicit.filter(|x| !x.as_os_str().is_empty()) {
        return Some(path.to_path_buf());
    }
    home.filter(|x| !x.is_empty())
        .map(|home| PathBuf::from(home).join(".kube").join("config"))
}

/// DER encodings of every certificate in a PEM bundle.
pub fn parse_pem_certificates(data: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let certs: Vec<Vec<u8>> = pem::parse_many(data)
        .map_err(|e| Error::ConfigError(format!("invalid CA certificate: {e}")))?
        .into_iter()
        .filter(|x| x.tag() == "CERTIFICATE")
        .map(|x| x.into_contents())
        .collect();
    if certs.is_empty() {
        return Err(Error::ConfigError(
            "no certificate found in CA certificate file".to_string(),
        ));
    }
    Ok(certs)
}

/// Builds an API client from the kubeconfig, with the TLS material from `args` taking precedence.
pub async fn build_client(args: &AttestorArgs) -> Result<Client, Error> {
    let path = resolve_kubeconfig_path(args.kubeconfig.as_deref(), std::env::var_os("HOME"))
        .ok_or_else(|| {
            Error::ConfigError(
                "error locating Kubernetes cluster config, please use --kubeconfig to provide location"
                    .to_string(),
            )
        })?;
    info!("using kubeconfig file {}", path.display());

    let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
        Error::ConfigError(format!("error accessing Kubernetes cluster config: {e}"))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::ConfigError(format!("error loading Kubernetes cluster config: {e}")))?;

    if let Some(ca_cert) = &args.ca_cert {
        let data = std::fs::read(ca_cert).map_err(|e| Error::storage(ca_cert, e))?;
        config.root_cert = Some(parse_pem_certificates(&data)?);
    }
    if let Some(client_cert) = &args.client_cert {
        config.auth_info.client_certificate = Some(client_cert.display().to_string());
        config.auth_info.client_certificate_data = None;
    }
    if let Some(client_key) = &args.client_key {
        config.auth_info.client_key = Some(client_key.display().to_string());
        config.auth_info.client_key_data = None;
    }

    Ok(Client::try_from(config)?)
}
