use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, SerializePatchError},
    DynamicObject, ResourceExt,
};
use log::{info, warn};
use warp::{http::StatusCode, reply::Reply, Filter};

use crate::{
    config::MediatorArgs,
    patch::SidecarPatch,
    policy::{AlwaysInject, InjectionPolicy},
    Error,
};

/// Admission reviews are capped at 3MiB by the API server.
const MAX_BODY_BYTES: u64 = 3 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MediationError {
    #[error("Error unmarshaling body: {0}")]
    MalformedBody(serde_json::Error),
    #[error("Error unmarshaling body: empty request")]
    MissingRequest,
    #[error("Error unmarshaling raw object: no object in request")]
    MissingObject,
    #[error("Error unmarshaling raw object: {0}")]
    MalformedObject(serde_json::Error),
    #[error("Error getting patch: {0}")]
    PatchError(#[from] SerializePatchError),
    #[error("Error marshaling response: {0}")]
    ResponseError(serde_json::Error),
}

impl MediationError {
    pub fn status(&self) -> StatusCode {
        match self {
            MediationError::MalformedBody(_)
            | MediationError::MissingRequest
            | MediationError::MissingObject
            | MediationError::MalformedObject(_) => StatusCode::BAD_REQUEST,
            MediationError::PatchError(_) | MediationError::ResponseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Answers pod admission reviews, appending the sidecar when the policy asks for it.
///
/// Pods are never denied: a review either comes back with the patch or unchanged.
pub struct AdmissionMediator {
    patch: SidecarPatch,
    policy: Box<dyn InjectionPolicy>,
}

impl AdmissionMediator {
    pub fn new(patch: SidecarPatch) -> Self {
        AdmissionMediator {
            patch,
            policy: Box::new(AlwaysInject),
        }
    }

    pub fn with_policy(mut self, policy: impl InjectionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn review(&self, body: &[u8]) -> Result<AdmissionReview<DynamicObject>, MediationError> {
        let review: AdmissionReview<DynamicObject> =
            serde_json::from_slice(body).map_err(MediationError::MalformedBody)?;
        let req: AdmissionRequest<DynamicObject> = review
            .try_into()
            .map_err(|_| MediationError::MissingRequest)?;
        let obj = req.object.as_ref().ok_or(MediationError::MissingObject)?;
        let pod: Pod = serde_json::to_value(obj)
            .and_then(serde_json::from_value)
            .map_err(MediationError::MalformedObject)?;

        let mut res = AdmissionResponse::from(&req);
        if self.policy.needs_sidecar(&pod) {
            res = res.with_patch(self.patch.operations())?;
            info!(
                "injecting sidecar: {:?} on Pod {}/{}",
                req.operation,
                req.namespace.as_deref().unwrap_or_default(),
                pod.name_any()
            );
        }
        Ok(res.into_review())
    }

    /// Serialized response body for `body`.
    pub fn respond(&self, body: &[u8]) -> Result<Vec<u8>, MediationError> {
        let review = self.review(body)?;
        serde_json::to_vec(&review).map_err(MediationError::ResponseError)
    }
}

pub fn routes(
    mediator: Arc<AdmissionMediator>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path("inject"))
        .and(warp::path::end())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(warp::any().map(move || mediator.clone()))
        .and_then(inject_handler)
        .with(warp::log::log("skbridge"))
}

async fn inject_handler(
    body: Bytes,
    mediator: Arc<AdmissionMediator>,
) -> Result<impl Reply, Infallible> {
    match mediator.respond(&body) {
        Ok(out) => Ok(warp::http::Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(out)),
        Err(e) => {
            warn!("rejected admission review: {e}");
            Ok(warp::http::Response::builder()
                .status(e.status())
                .body(e.to_string().into_bytes()))
        }
    }
}

pub async fn run_webhook(args: &MediatorArgs) -> Result<(), Error> {
    let cert = std::fs::read(&args.wh_cert).map_err(|e| Error::storage(&args.wh_cert, e))?;
    let key = std::fs::read(&args.wh_key).map_err(|e| Error::storage(&args.wh_key, e))?;

    let mut mediator =
        AdmissionMediator::new(SidecarPatch::new(&args.sidecar_image, &args.host_mount));
    if let Some(skip) = args.skip_label.clone() {
        info!("pods labelled {}={} are left alone", skip.key, skip.value);
        mediator = mediator.with_policy(skip);
    }

    let bind = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("webhook listening on {bind}");

    warp::serve(routes(Arc::new(mediator)))
        .tls()
        .cert(&cert)
        .key(&key)
        .run(bind)
        .await;

    Ok(())
}
