use annogate_core::ProxyPattern;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;

use crate::{Pod, Service};

/// The seam between the reconciler and the watched resource kinds.
///
/// A workload names the pattern its rule sets must declare, says whether it is
/// currently allowed to contribute routes, and supplies the cluster-internal
/// IP upstream origins are built from.
pub trait Workload:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Pattern a rule set must declare to bind to this kind.
    const PATTERN: ProxyPattern;

    /// Whether the object is ready to carry routes.
    fn routable(&self) -> bool;

    /// The cluster-internal IP upstream targets are built from.
    fn upstream_ip(&self) -> Option<&str>;
}

impl Workload for Pod {
    const PATTERN: ProxyPattern = ProxyPattern::Pod;

    /// Only running pods contribute routes.
    fn routable(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some("Running")
    }

    fn upstream_ip(&self) -> Option<&str> {
        self.status.as_ref()?.pod_ip.as_deref()
    }
}

impl Workload for Service {
    const PATTERN: ProxyPattern = ProxyPattern::Service;

    fn routable(&self) -> bool {
        true
    }

    fn upstream_ip(&self) -> Option<&str> {
        self.spec.as_ref()?.cluster_ip.as_deref()
    }
}
