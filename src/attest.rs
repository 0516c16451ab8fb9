use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use k8s_openapi::{
    api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestSpec},
    ByteString,
};
use kube::{
    api::{PostParams, WatchEvent, WatchParams},
    core::ObjectMeta,
    Api,
};
use log::{debug, error, info, warn};

use crate::{
    csr,
    identity::IdentityStore,
    key,
    retry::{retry_transient, RetryConfig},
    Error,
};

pub const CSR_PEM_BLOCK_TYPE: &str = "CERTIFICATE REQUEST";
/// Signer the control plane auto-approves for `system:node:<name>` client requests.
pub const KUBELET_CLIENT_SIGNER: &str = "kubernetes.io/kube-apiserver-client-kubelet";
pub const REQUEST_GROUPS: [&str; 1] = ["system:authenticated"];
pub const REQUEST_USAGES: [&str; 3] = ["digital signature", "key encipherment", "client auth"];
const APPROVED_CONDITION: &str = "Approved";

pub type EventStream = BoxStream<'static, Result<WatchEvent<CertificateSigningRequest>, Error>>;

/// The part of the API server the attestor talks to.
#[async_trait]
pub trait SigningRequestApi: Send + Sync {
    async fn create(
        &self,
        request: &CertificateSigningRequest,
    ) -> Result<CertificateSigningRequest, Error>;

    /// Streams changes to every signing request after `resource_version`.
    async fn watch(&self, resource_version: &str) -> Result<EventStream, Error>;
}

#[async_trait]
impl SigningRequestApi for Api<CertificateSigningRequest> {
    async fn create(
        &self,
        request: &CertificateSigningRequest,
    ) -> Result<CertificateSigningRequest, Error> {
        Ok(Api::create(self, &PostParams::default(), request).await?)
    }

    async fn watch(&self, resource_version: &str) -> Result<EventStream, Error> {
        let stream = Api::watch(self, &WatchParams::default(), resource_version).await?;
        Ok(stream
            .map_err(|e| match e {
                kube::Error::SerdeError(e) => Error::UnexpectedObject(e.to_string()),
                e => e.into(),
            })
            .boxed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationPhase {
    Init,
    KeySaved,
    RequestSubmitted,
    Watching,
    Approved,
    Terminal,
    Fatal,
}

pub fn request_name(agent_name: &str, timestamp: i64) -> String {
    format!("{agent_name}-{timestamp}")
}

/// Wraps a DER request into the resource submitted to the API server.
pub fn signing_request(name: &str, request_der: &[u8]) -> CertificateSigningRequest {
    let pem = pem::encode(&pem::Pem::new(CSR_PEM_BLOCK_TYPE, request_der.to_vec()));
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            groups: Some(REQUEST_GROUPS.iter().map(|x| x.to_string()).collect()),
            request: ByteString(pem.into_bytes()),
            signer_name: KUBELET_CLIENT_SIGNER.to_string(),
            usages: Some(REQUEST_USAGES.iter().map(|x| x.to_string()).collect()),
            ..Default::default()
        },
        status: None,
    }
}

/// The issued certificate, once `request` is approved and the signer has filled it in.
pub fn issued_certificate(request: &CertificateSigningRequest) -> Option<Vec<u8>> {
    let status = request.status.as_ref()?;
    let approved = status
        .conditions
        .as_ref()
        .map(|x| {
            x.iter()
                .any(|c| c.type_ == APPROVED_CONDITION && c.status != "False")
        })
        .unwrap_or_default();
    if !approved {
        return None;
    }
    status
        .certificate
        .as_ref()
        .map(|x| x.0.clone())
        .filter(|x| !x.is_empty())
}

/// Follows signing request changes after `resource_version` until the request called
/// `name` is approved and issued.
///
/// Events about other requests are skipped. Watches the API server closes on its own are
/// reopened from the last resource version seen. With `timeout` set the wait fails with
/// [`Error::ApprovalTimeout`] once it elapses; without it the wait is unbounded.
pub async fn await_approval<A: SigningRequestApi + ?Sized>(
    api: &A,
    retry: &RetryConfig,
    name: &str,
    resource_version: String,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, Error> {
    let wait = follow_request(api, retry, name, resource_version);
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::ApprovalTimeout {
                name: name.to_string(),
                timeout,
            })?,
        None => wait.await,
    }
}

async fn follow_request<A: SigningRequestApi + ?Sized>(
    api: &A,
    retry: &RetryConfig,
    name: &str,
    mut resource_version: String,
) -> Result<Vec<u8>, Error> {
    loop {
        let events = retry_transient(retry, "watch signing requests", || {
            api.watch(&resource_version)
        })
        .await?;
        if let Some(cert) = watch_for_approval(events, name, &mut resource_version).await? {
            return Ok(cert);
        }
        debug!("watch on signing requests closed at version {resource_version}, reopening");
    }
}

/// Consumes one watch. `None` means the stream closed cleanly before approval.
async fn watch_for_approval<S>(
    mut events: S,
    name: &str,
    resource_version: &mut String,
) -> Result<Option<Vec<u8>>, Error>
where
    S: Stream<Item = Result<WatchEvent<CertificateSigningRequest>, Error>> + Unpin,
{
    while let Some(event) = events.try_next().await? {
        match event {
            WatchEvent::Added(request) | WatchEvent::Modified(request) => {
                track_version(resource_version, &request);
                if request.metadata.name.as_deref() != Some(name) {
                    continue;
                }
                if let Some(cert) = issued_certificate(&request) {
                    info!("signing request {name} approved");
                    return Ok(Some(cert));
                }
                let conditions = request
                    .status
                    .as_ref()
                    .and_then(|x| x.conditions.as_ref())
                    .map(|x| x.iter().map(|c| c.type_.as_str()).collect::<Vec<_>>())
                    .unwrap_or_default();
                if conditions.iter().any(|x| *x == "Denied" || *x == "Failed") {
                    warn!("signing request {name} will not be issued: {conditions:?}");
                } else {
                    debug!("signing request {name} updated, conditions: {conditions:?}");
                }
            }
            WatchEvent::Deleted(request) => {
                if request.metadata.name.as_deref() == Some(name) {
                    return Err(Error::RequestDeleted(name.to_string()));
                }
                track_version(resource_version, &request);
            }
            WatchEvent::Bookmark(bookmark) => {
                *resource_version = bookmark.metadata.resource_version;
            }
            WatchEvent::Error(e) => return Err(kube::Error::Api(e).into()),
        }
    }
    Ok(None)
}

fn track_version(resource_version: &mut String, request: &CertificateSigningRequest) {
    if let Some(version) = &request.metadata.resource_version {
        resource_version.clone_from(version);
    }
}

/// Runs one attestation: key, request, submission, approval watch, identity document.
pub struct Attestor<A> {
    api: A,
    store: IdentityStore,
    agent_name: String,
    retry: RetryConfig,
    approval_timeout: Option<Duration>,
    clock: fn() -> i64,
    phase: AttestationPhase,
}

impl<A: SigningRequestApi> Attestor<A> {
    pub fn new(api: A, store: IdentityStore, agent_name: impl Into<String>) -> Self {
        Attestor {
            api,
            store,
            agent_name: agent_name.into(),
            retry: RetryConfig::default(),
            approval_timeout: None,
            clock: || Utc::now().timestamp(),
            phase: AttestationPhase::Init,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Replaces the source of the request name disambiguator (unix seconds by default).
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> AttestationPhase {
        self.phase
    }

    /// Returns the issued certificate after it has been written next to the key.
    pub async fn run(&mut self) -> Result<Vec<u8>, Error> {
        match self.attest().await {
            Ok(cert) => {
                self.transition(AttestationPhase::Terminal);
                Ok(cert)
            }
            Err(e) => {
                error!("attestation failed in phase {:?}: {e}", self.phase);
                self.transition(AttestationPhase::Fatal);
                Err(e)
            }
        }
    }

    async fn attest(&mut self) -> Result<Vec<u8>, Error> {
        let key_pair = key::generate_and_store(&self.store.staged_key_path())?;
        self.transition(AttestationPhase::KeySaved);

        let request_der = csr::build_request(&key_pair, &self.agent_name)?;
        let name = request_name(&self.agent_name, (self.clock)());
        let request = signing_request(&name, &request_der);

        let created = {
            let api = &self.api;
            retry_transient(&self.retry, "create signing request", || api.create(&request))
                .await?
        };
        info!("submitted signing request {name}");
        self.transition(AttestationPhase::RequestSubmitted);

        let resource_version = created
            .metadata
            .resource_version
            .unwrap_or_else(|| "0".to_string());
        self.transition(AttestationPhase::Watching);

        let cert = await_approval(
            &self.api,
            &self.retry,
            &name,
            resource_version,
            self.approval_timeout,
        )
        .await?;
        self.transition(AttestationPhase::Approved);

        self.store.commit(&cert)?;
        Ok(cert)
    }

    fn transition(&mut self, phase: AttestationPhase) {
        debug!("attestation {:?} -> {phase:?}", self.phase);
        self.phase = phase;
    }
}
