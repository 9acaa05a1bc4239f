//! Kubernetes surface for the annotation-driven proxy.
//!
//! This crate owns everything that talks to the cluster API: typed resource
//! re-exports, the [`watch::Watch`] adapter that turns raw watcher events into
//! add/update/delete workload events, and the [`Reconciler`] that projects
//! `proxy` annotations on pods and services into the shared route index.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod reconcile;
pub mod watch;
mod workload;

pub use self::reconcile::{Reconciler, RULES_ANNOTATION};
pub use self::workload::Workload;

pub use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
};
pub use kube::{
    api::{Api, ObjectMeta, Resource, ResourceExt},
    config::{KubeConfigOptions, Kubeconfig},
    runtime::watcher,
    Client, Config, Error,
};
