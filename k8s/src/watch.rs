//! Turns a raw watcher stream into per-object add/update/delete events.

use std::collections::VecDeque;
use std::pin::Pin;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use kube::runtime::watcher;
use kube::ResourceExt;
use tokio::time;
use tracing::info;

/// A watch event with the previous observation attached where one exists.
#[derive(Clone, Debug)]
pub enum WorkloadEvent<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

/// Wraps an event stream that never terminates.
///
/// The watcher only reports the current state of an object; this adapter keeps
/// the last observed copy of every object so that apply events split into adds
/// and updates, and so that a restarted watch can synthesize deletions for
/// objects that vanished while the stream was down.
pub struct Watch<T> {
    rx: Pin<Box<dyn Stream<Item = Result<watcher::Event<T>, watcher::Error>> + Send + 'static>>,
    store: HashMap<(String, String), T>,
    pending: VecDeque<WorkloadEvent<T>>,
}

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<watcher::Event<T>, watcher::Error>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Watch {
            rx: watch.boxed(),
            store: HashMap::default(),
            pending: VecDeque::new(),
        }
    }
}

impl<T> Watch<T>
where
    T: ResourceExt + Clone,
{
    /// Receive the next event in the stream.
    ///
    /// If the stream fails, log the error and sleep for 1s before polling for
    /// a reset event.
    pub async fn recv(&mut self) -> WorkloadEvent<T> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            match self
                .rx
                .next()
                .await
                .expect("watch stream must not terminate")
            {
                Ok(event) => self.translate(event),
                Err(error) => {
                    info!(%error, "Disconnected");
                    time::sleep(time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn translate(&mut self, event: watcher::Event<T>) {
        match event {
            watcher::Event::Applied(obj) => self.applied(obj),
            watcher::Event::Deleted(obj) => {
                self.store.remove(&key(&obj));
                self.pending.push_back(WorkloadEvent::Deleted(obj));
            }
            watcher::Event::Restarted(objs) => {
                // A restart replays the full state; anything we knew about
                // that is absent from the snapshot was deleted while the
                // stream was down.
                let seen: HashSet<(String, String)> = objs.iter().map(|obj| key(obj)).collect();
                let stale: Vec<(String, String)> = self
                    .store
                    .keys()
                    .filter(|known| !seen.contains(*known))
                    .cloned()
                    .collect();
                for known in stale {
                    if let Some(old) = self.store.remove(&known) {
                        self.pending.push_back(WorkloadEvent::Deleted(old));
                    }
                }
                for obj in objs {
                    self.applied(obj);
                }
            }
        }
    }

    fn applied(&mut self, obj: T) {
        match self.store.insert(key(&obj), obj.clone()) {
            None => self.pending.push_back(WorkloadEvent::Added(obj)),
            Some(old) => self.pending.push_back(WorkloadEvent::Updated { old, new: obj }),
        }
    }
}

fn key<T: ResourceExt>(obj: &T) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::{ObjectMeta, Pod};

    fn pod(name: &str, resource_version: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                resource_version: Some(resource_version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn rv(pod: &Pod) -> String {
        pod.resource_version().unwrap_or_default()
    }

    #[tokio::test]
    async fn splits_applies_into_adds_and_updates() {
        let events = vec![
            Ok(watcher::Event::Applied(pod("a", "1"))),
            Ok(watcher::Event::Applied(pod("a", "2"))),
            Ok(watcher::Event::Deleted(pod("a", "2"))),
        ];
        let mut watch = Watch::from(stream::iter(events));

        match watch.recv().await {
            WorkloadEvent::Added(obj) => assert_eq!(rv(&obj), "1"),
            event => panic!("expected add, got {event:?}"),
        }
        match watch.recv().await {
            WorkloadEvent::Updated { old, new } => {
                assert_eq!(rv(&old), "1");
                assert_eq!(rv(&new), "2");
            }
            event => panic!("expected update, got {event:?}"),
        }
        match watch.recv().await {
            WorkloadEvent::Deleted(obj) => assert_eq!(obj.name_any(), "a"),
            event => panic!("expected delete, got {event:?}"),
        }
    }

    #[tokio::test]
    async fn a_restart_synthesizes_deletions_for_vanished_objects() {
        let events = vec![
            Ok(watcher::Event::Applied(pod("a", "1"))),
            Ok(watcher::Event::Applied(pod("b", "1"))),
            Ok(watcher::Event::Restarted(vec![pod("a", "2")])),
        ];
        let mut watch = Watch::from(stream::iter(events));

        watch.recv().await;
        watch.recv().await;

        match watch.recv().await {
            WorkloadEvent::Deleted(obj) => assert_eq!(obj.name_any(), "b"),
            event => panic!("expected delete, got {event:?}"),
        }
        match watch.recv().await {
            WorkloadEvent::Updated { old, new } => {
                assert_eq!(rv(&old), "1");
                assert_eq!(rv(&new), "2");
            }
            event => panic!("expected update, got {event:?}"),
        }
    }
}
