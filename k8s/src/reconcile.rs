use std::marker::PhantomData;

use annogate_core::{RuleSet, SharedRouteIndex};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, warn};

use crate::watch::{Watch, WorkloadEvent};
use crate::Workload;

/// Annotation key carrying an encoded rule set.
pub const RULES_ANNOTATION: &str = "proxy";

/// Applies watch events for one resource kind to the shared route index.
///
/// Every failure here is per-event and non-fatal: a dropped event leaves the
/// index stale until the next event for the same object (or a watch resync)
/// restores it.
pub struct Reconciler<T> {
    index: SharedRouteIndex,
    client: Client,
    _kind: PhantomData<fn(T)>,
}

impl<T: Workload> Reconciler<T> {
    pub fn new(index: SharedRouteIndex, client: Client) -> Self {
        Self {
            index,
            client,
            _kind: PhantomData,
        }
    }

    /// Drives the reconciler until the task is dropped at shutdown.
    pub async fn run(self, mut events: Watch<T>) {
        loop {
            match events.recv().await {
                WorkloadEvent::Added(obj) => apply(&self.index, &obj),
                WorkloadEvent::Updated { old, new } => self.update(&old, &new).await,
                WorkloadEvent::Deleted(obj) => withdraw(&self.index, &obj),
            }
        }
    }

    /// Refetches the object before applying so that a stale cached copy never
    /// overwrites fresher state. Updates that change nothing are skipped.
    async fn update(&self, old: &T, new: &T) {
        if old.resource_version() == new.resource_version() {
            return;
        }

        let namespace = match new.namespace() {
            Some(namespace) => namespace,
            None => return,
        };
        let api = Api::<T>::namespaced(self.client.clone(), &namespace);
        match api.get(&new.name_any()).await {
            Ok(obj) => apply(&self.index, &obj),
            Err(error) => debug!(%error, name = %new.name_any(), "refetch failed; dropping update"),
        }
    }
}

/// Registers the routes carried by an object's annotation, if any.
fn apply<T: Workload>(index: &SharedRouteIndex, obj: &T) {
    let encoded = match obj.annotations().get(RULES_ANNOTATION) {
        Some(encoded) => encoded,
        None => return,
    };

    if !obj.routable() {
        debug!(name = %obj.name_any(), "not ready for routing");
        return;
    }

    let rules = match annotated_rules::<T>(encoded) {
        Some(rules) => rules,
        None => return,
    };

    let ip = match obj.upstream_ip() {
        // A headless service carries the literal cluster IP "None".
        Some(ip) if !ip.is_empty() && ip != "None" => ip,
        _ => {
            debug!(name = %obj.name_any(), "no upstream address");
            return;
        }
    };

    let mut index = index.write();
    for rule in &rules.items {
        let origin = format!("http://{}:{}", ip, rule.port);
        index.add(rule.method, &rule.agent_url, &rule.proxy_url, &origin);
    }
}

/// Unregisters the routes carried by an object's annotation.
///
/// Deletion intentionally skips the readiness filter: a pod that left the
/// Running phase before its delete event arrived must still have its routes
/// withdrawn.
fn withdraw<T: Workload>(index: &SharedRouteIndex, obj: &T) {
    let encoded = match obj.annotations().get(RULES_ANNOTATION) {
        Some(encoded) => encoded,
        None => return,
    };

    let rules = match annotated_rules::<T>(encoded) {
        Some(rules) => rules,
        None => return,
    };

    let mut index = index.write();
    for rule in &rules.items {
        index.delete(rule.method, &rule.agent_url);
    }
}

/// Decodes an annotation value and checks it against the watched kind.
fn annotated_rules<T: Workload>(encoded: &str) -> Option<RuleSet> {
    let rules = match RuleSet::decode(encoded) {
        Ok(rules) => rules,
        Err(error) => {
            error!(%error, "invalid proxy annotation");
            return None;
        }
    };

    if rules.pattern != T::PATTERN {
        warn!(
            expected = ?T::PATTERN,
            found = ?rules.pattern,
            "rule set pattern does not match the watched kind",
        );
        return None;
    }

    Some(rules)
}
