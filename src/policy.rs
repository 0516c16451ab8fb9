use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// Decides whether a pod being admitted gets the identity sidecar.
pub trait InjectionPolicy: Send + Sync {
    fn needs_sidecar(&self, pod: &Pod) -> bool;
}

impl<F> InjectionPolicy for F
where
    F: Fn(&Pod) -> bool + Send + Sync,
{
    fn needs_sidecar(&self, pod: &Pod) -> bool {
        self(pod)
    }
}

/// Injects into every pod.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysInject;

impl InjectionPolicy for AlwaysInject {
    fn needs_sidecar(&self, _pod: &Pod) -> bool {
        true
    }
}

/// Injects into every pod except those labelled `key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipLabelled {
    pub key: String,
    pub value: String,
}

impl SkipLabelled {
    /// Parses `key=value`.
    pub fn parse(selector: &str) -> Option<Self> {
        let (key, value) = selector.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(SkipLabelled {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl InjectionPolicy for SkipLabelled {
    fn needs_sidecar(&self, pod: &Pod) -> bool {
        pod.labels().get(&self.key) != Some(&self.value)
    }
}
