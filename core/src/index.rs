use std::sync::Arc;

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::rules::Method;

/// A shared handle on the route index.
///
/// Reconcilers take the write side to apply watch events; request handlers
/// take the read side for lookups. Terminal payloads are only ever swapped
/// under the exclusive lock, so a lookup can never observe a half-written
/// target.
pub type SharedRouteIndex = Arc<RwLock<RouteIndex>>;

/// Per-method prefix trees over URL path segments.
///
/// Lookups have longest-matching-prefix semantics: walking stops at the first
/// segment without a child, and the remaining segments are appended to the
/// matched route's upstream path.
#[derive(Debug, Default)]
pub struct RouteIndex {
    routes: HashMap<Method, Node>,
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    target: Option<Target>,
}

/// Terminal payload of a route node.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Target {
    origin: String,
    proxy_url: String,
}

/// A successful lookup: the upstream origin and the rewritten request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch {
    pub origin: String,
    pub path: String,
}

impl RouteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRouteIndex {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Registers a route under `agent_url`, overwriting any previous target
    /// stored there. `Method::Any` registers all nine concrete methods.
    pub fn add(&mut self, method: Method, agent_url: &str, proxy_url: &str, origin: &str) {
        if let Method::Any = method {
            for method in Method::ALL {
                self.insert(method, agent_url, proxy_url, origin);
            }
        } else {
            self.insert(method, agent_url, proxy_url, origin);
        }
    }

    /// Unregisters the route at `agent_url` along with everything below it.
    ///
    /// Removal detaches the subtree at the first matched segment: an annotated
    /// workload owns its whole path prefix, and a later add rebuilds it.
    pub fn delete(&mut self, method: Method, agent_url: &str) {
        if let Method::Any = method {
            for method in Method::ALL {
                self.remove(method, agent_url);
            }
        } else {
            self.remove(method, agent_url);
        }
    }

    /// Resolves `path` to its longest matching route.
    ///
    /// The returned path is the matched route's upstream path with the
    /// unmatched tail segments appended. Lookups that end on a node with no
    /// target do not match.
    pub fn find(&self, method: Method, path: &str) -> Option<RouteMatch> {
        let root = self.routes.get(&method)?;
        let segments = segments(path);

        let mut node = root;
        let mut tail: &[&str] = &[];
        for (offset, segment) in segments.iter().enumerate() {
            match node.children.get(*segment) {
                Some(child) => node = child,
                None => {
                    tail = &segments[offset..];
                    break;
                }
            }
        }

        let target = node.target.as_ref()?;
        Some(RouteMatch {
            origin: target.origin.clone(),
            path: rejoin(&target.proxy_url, tail),
        })
    }

    fn insert(&mut self, method: Method, agent_url: &str, proxy_url: &str, origin: &str) {
        let mut node = self.routes.entry(method).or_default();
        for segment in segments(agent_url) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.target = Some(Target {
            origin: origin.to_string(),
            proxy_url: proxy_url.to_string(),
        });
        debug!(?method, agent_url, origin, "route added");
    }

    fn remove(&mut self, method: Method, agent_url: &str) {
        let root = match self.routes.get_mut(&method) {
            Some(root) => root,
            None => return,
        };

        // Each removed child becomes the cursor for the next segment, so the
        // first segment found under the live tree takes its entire subtree
        // with it.
        let mut cursor: Option<Node> = None;
        for segment in segments(agent_url) {
            let removed = match cursor.as_mut() {
                Some(node) => node.children.remove(segment),
                None => root.children.remove(segment),
            };
            match removed {
                Some(node) => cursor = Some(node),
                None => break,
            }
        }
        debug!(?method, agent_url, "route deleted");
    }
}

/// Splits a path on `/`, dropping the empty segments produced by leading,
/// trailing, or duplicated slashes.
fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins the stored upstream path with the unmatched tail. A stored path of
/// `/` contributes no segments, so `/api/x` routed there rewrites to `/x`,
/// never `//x`.
fn rejoin(proxy_url: &str, tail: &[&str]) -> String {
    let mut path = String::new();
    for segment in segments(proxy_url).into_iter().chain(tail.iter().copied()) {
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn rewrites_the_tail_past_the_matched_prefix() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/api/game", "/api/game", "http://127.0.0.1:8080");

        assert_eq!(
            index.find(Method::Get, "/api/game/qwq/qwqeq"),
            Some(RouteMatch {
                origin: "http://127.0.0.1:8080".to_string(),
                path: "/api/game/qwq/qwqeq".to_string(),
            })
        );
    }

    #[test]
    fn returns_the_stored_upstream_path_on_an_exact_match() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/v1", "/internal/v1", "http://10.0.0.7:9000");

        assert_eq!(
            index.find(Method::Get, "/v1"),
            Some(RouteMatch {
                origin: "http://10.0.0.7:9000".to_string(),
                path: "/internal/v1".to_string(),
            })
        );
    }

    #[test]
    fn prefers_the_longest_matching_prefix() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/a", "/x1", "http://a:1");
        index.add(Method::Get, "/a/b", "/x2", "http://b:2");

        assert_eq!(
            index.find(Method::Get, "/a/b/c"),
            Some(RouteMatch {
                origin: "http://b:2".to_string(),
                path: "/x2/c".to_string(),
            })
        );
        assert_eq!(
            index.find(Method::Get, "/a/q"),
            Some(RouteMatch {
                origin: "http://a:1".to_string(),
                path: "/x1/q".to_string(),
            })
        );
    }

    #[test]
    fn does_not_match_through_an_untargeted_node() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/a/b/c", "/x", "http://c:3");

        // /a/b exists only as an interior node.
        assert_eq!(index.find(Method::Get, "/a/b"), None);
    }

    #[test]
    fn methods_are_isolated() {
        let mut index = RouteIndex::new();
        index.add(Method::Post, "/api/swagger", "/api/swagger", "http://127.0.0.1:8081");

        assert_eq!(
            index.find(Method::Post, "/api/swagger/test/ws"),
            Some(RouteMatch {
                origin: "http://127.0.0.1:8081".to_string(),
                path: "/api/swagger/test/ws".to_string(),
            })
        );
        assert_eq!(index.find(Method::Get, "/api/swagger/test/ws"), None);
    }

    #[test]
    fn any_registers_all_nine_methods() {
        let mut index = RouteIndex::new();
        index.add(Method::Any, "/api", "/api", "http://s:8433");

        for method in Method::ALL {
            assert_eq!(
                index.find(method, "/api"),
                Some(RouteMatch {
                    origin: "http://s:8433".to_string(),
                    path: "/api".to_string(),
                }),
                "{method:?}"
            );
        }
    }

    #[test]
    fn any_deletes_all_nine_methods() {
        let mut index = RouteIndex::new();
        index.add(Method::Any, "/api", "/api", "http://s:8433");
        index.delete(Method::Any, "/api");

        for method in Method::ALL {
            assert_eq!(index.find(method, "/api"), None, "{method:?}");
        }
    }

    #[test]
    fn deleted_routes_stop_matching() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/api/game", "/api/game", "http://127.0.0.1:8080");
        index.delete(Method::Get, "/api/game");

        assert_eq!(index.find(Method::Get, "/api/game/qwq/qwqeq"), None);
    }

    #[test]
    fn delete_detaches_the_whole_prefix_subtree() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/api", "/api", "http://a:1");
        index.add(Method::Get, "/api/game", "/game", "http://b:2");
        index.delete(Method::Get, "/api/game");

        // The first matched segment takes its subtree with it.
        assert_eq!(index.find(Method::Get, "/api"), None);
        assert_eq!(index.find(Method::Get, "/api/game"), None);
    }

    #[test]
    fn delete_of_an_unknown_path_is_a_no_op() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/api", "/api", "http://a:1");
        index.delete(Method::Get, "/other");
        index.delete(Method::Post, "/api");

        assert!(index.find(Method::Get, "/api").is_some());
    }

    #[test]
    fn reinsertion_overwrites_the_target() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/api", "/api", "http://old:1");
        index.add(Method::Get, "/api", "/v2/api", "http://new:2");

        assert_eq!(
            index.find(Method::Get, "/api"),
            Some(RouteMatch {
                origin: "http://new:2".to_string(),
                path: "/v2/api".to_string(),
            })
        );
    }

    #[test]
    fn a_root_upstream_path_rewrites_without_doubled_slashes() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "/api", "/", "http://a:1");

        assert_eq!(
            index.find(Method::Get, "/api/x").unwrap().path,
            "/x".to_string()
        );
        assert_eq!(index.find(Method::Get, "/api").unwrap().path, "/".to_string());
    }

    #[test]
    fn slashes_normalize_in_stored_and_queried_paths() {
        let mut index = RouteIndex::new();
        index.add(Method::Get, "api//game/", "/api/game", "http://a:1");

        assert_eq!(
            index.find(Method::Get, "//api/game//x/").unwrap().path,
            "/api/game/x".to_string()
        );
    }

    quickcheck! {
        fn slash_noise_never_changes_a_lookup(raw: Vec<String>) -> bool {
            let segments: Vec<String> = raw
                .iter()
                .map(|s| s.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
                .filter(|s| !s.is_empty())
                .collect();

            let mut index = RouteIndex::new();
            index.add(Method::Get, "/svc", "/upstream", "http://127.0.0.1:80");

            let clean = format!("/svc/{}", segments.join("/"));
            let noisy = format!("//svc///{}//", segments.join("//"));
            index.find(Method::Get, &clean) == index.find(Method::Get, &noisy)
        }
    }
}
