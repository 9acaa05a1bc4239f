//! Core routing domain for the annotation-driven reverse proxy.
//!
//! Workloads opt into proxying by carrying a `proxy` metadata annotation whose
//! value is a base64-wrapped JSON rule set. Each rule binds an inbound
//! (method, path-prefix) pair to an upstream path prefix and port. The rules
//! are projected into a [`RouteIndex`]: one prefix tree of path segments per
//! request method, supporting longest-matching-prefix lookups that also yield
//! the rewritten upstream path.
//!
//! ```ignore
//! [annotation] --decode--> [RuleSet] --reconcile--> [RouteIndex] <--find-- [request]
//! ```
//!
//! Nothing in this crate touches the Kubernetes API; the k8s crate drives the
//! index from watch events and the proxy crate resolves requests against it.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;
mod rules;

pub use self::index::{RouteIndex, RouteMatch, SharedRouteIndex};
pub use self::rules::{DecodeError, Method, ProxyPattern, Rule, RuleSet};
