use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{policy::SkipLabelled, retry::RetryConfig, Error};

/// Node agent that obtains its cluster identity document through a signing request
#[derive(Parser, Debug, Clone)]
#[command(name = "node-attestor", version, about, long_about = None)]
pub struct AttestorArgs {
    /// Path to the kubeconfig file (falls back to $HOME/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Node agent name to be inserted in the identity document (defaults to the host name)
    #[arg(long)]
    pub agent_name: Option<String>,

    /// CA certificate used to validate the API server certificate
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate used to authenticate to the API server
    #[arg(long)]
    pub client_cert: Option<PathBuf>,

    /// Private key of the client certificate
    #[arg(long)]
    pub client_key: Option<PathBuf>,

    /// Directory where the identity document and its private key are stored
    #[arg(long, default_value = "/tmp/spire-agent-id")]
    pub id_dir: PathBuf,

    /// Give up waiting for approval after this many seconds (waits forever if unset)
    #[arg(long, env = "APPROVAL_TIMEOUT_SECS")]
    pub approval_timeout_secs: Option<u64>,

    /// Attempts for API calls failing with transient errors
    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,
}

impl AttestorArgs {
    pub fn agent_name(&self) -> Result<String, Error> {
        if let Some(name) = self.agent_name.as_ref().filter(|x| !x.is_empty()) {
            return Ok(name.clone());
        }
        hostname::get()
            .ok()
            .and_then(|x| x.into_string().ok())
            .filter(|x| !x.is_empty())
            .ok_or_else(|| {
                Error::ConfigError(
                    "unable to determine agent name automatically, please specify it with --agent-name"
                        .to_string(),
                )
            })
    }

    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.max_attempts)
    }
}

/// Admission webhook injecting the identity sidecar into new pods
#[derive(Parser, Debug, Clone)]
#[command(name = "skbridge", version, about, long_about = None)]
pub struct MediatorArgs {
    /// Certificate served by the webhook
    #[arg(long, env = "WH_CERT")]
    pub wh_cert: PathBuf,

    /// Private key of the webhook certificate
    #[arg(long, env = "WH_KEY")]
    pub wh_key: PathBuf,

    /// Container image injected as sidecar, e.g. nginx:latest
    #[arg(long, env = "SIDECAR_IMAGE")]
    pub sidecar_image: String,

    /// Host path mounted into the sidecar under /spire, e.g. /tmp/spire
    #[arg(long, env = "HOST_MOUNT")]
    pub host_mount: String,

    /// TCP port to listen on
    #[arg(long, env = "SKBRIDGE_PORT", default_value_t = 9999)]
    pub port: u16,

    /// Leave pods carrying this label (KEY=VALUE) untouched
    #[arg(long, value_parser = parse_skip_label)]
    pub skip_label: Option<SkipLabelled>,
}

fn parse_skip_label(value: &str) -> Result<SkipLabelled, String> {
    SkipLabelled::parse(value).ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestor_defaults() {
        let args = AttestorArgs::try_parse_from([
            "node-attestor",
            "--kubeconfig",
            "/etc/kube/config",
            "--agent-name",
            "node-1",
        ])
        .unwrap();
        assert_eq!(args.id_dir, PathBuf::from("/tmp/spire-agent-id"));
        assert_eq!(args.agent_name().unwrap(), "node-1");
        assert_eq!(args.max_attempts, 5);
        assert!(args.ca_cert.is_none());
    }

    #[test]
    fn test_agent_name_falls_back_to_hostname() {
        let args = AttestorArgs::try_parse_from([
            "node-attestor",
            "--kubeconfig",
            "/etc/kube/config",
            "--agent-name",
            "",
        ])
        .unwrap();
        let host = hostname::get()
            .ok()
            .and_then(|x| x.into_string().ok())
            .filter(|x| !x.is_empty());
        match host {
            Some(expected) => assert_eq!(args.agent_name().unwrap(), expected),
            None => assert!(matches!(args.agent_name(), Err(Error::ConfigError(_)))),
        }
    }

    #[test]
    fn test_approval_timeout() {
        let args = AttestorArgs::try_parse_from([
            "node-attestor",
            "--kubeconfig",
            "/etc/kube/config",
            "--approval-timeout-secs",
            "90",
        ])
        .unwrap();
        assert_eq!(args.approval_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_mediator_args() {
        let args = MediatorArgs::try_parse_from([
            "skbridge",
            "--wh-cert",
            "/certs/tls.crt",
            "--wh-key",
            "/certs/tls.key",
            "--sidecar-image",
            "spire-agent:latest",
            "--host-mount",
            "/tmp/spire",
            "--skip-label",
            "spire=off",
        ])
        .unwrap();
        assert_eq!(args.port, 9999);
        assert_eq!(args.sidecar_image, "spire-agent:latest");
        assert_eq!(
            args.skip_label,
            Some(SkipLabelled {
                key: "spire".to_string(),
                value: "off".to_string(),
            })
        );

        assert!(MediatorArgs::try_parse_from([
            "skbridge",
            "--wh-cert",
            "/certs/tls.crt",
            "--wh-key",
            "/certs/tls.key",
            "--sidecar-image",
            "spire-agent:latest",
            "--host-mount",
            "/tmp/spire",
            "--skip-label",
            "spire",
        ])
        .is_err());
    }
}
