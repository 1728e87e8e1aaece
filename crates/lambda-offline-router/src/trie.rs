use std::collections::HashMap;

/// Method name that matches every request method.
pub const ANY_METHOD: &str = "ANY";

/// The routing trie. Maps request paths + methods to endpoints.
#[derive(Debug, Default)]
pub struct Router {
    root: Node,
    /// Registered `(method, path template)` pairs, in insertion order.
    routes: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Node {
    static_children: HashMap<String, Node>,
    /// At most one parameter child per node.
    param_child: Option<Box<NamedNode>>,
    /// Greedy child (`{name+}`); consumes every remaining segment.
    greedy_child: Option<Box<NamedNode>>,
    methods: HashMap<String, RouteEntry>,
}

#[derive(Debug)]
struct NamedNode {
    name: String,
    node: Node,
}

/// A registered route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Index into the dispatcher's endpoint list.
    pub endpoint_index: usize,
}

/// The result of a route lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteMatch {
    Found {
        entry: RouteEntry,
        params: Vec<(String, String)>,
    },
    /// The path exists but not for this method.
    MethodNotAllowed { allowed: Vec<String> },
    NotFound,
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Param(String),
    Greedy(String),
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Returns the entry previously registered for the
    /// same method and template, if any (the new entry replaces it).
    pub fn insert(&mut self, path: &str, method: &str, entry: RouteEntry) -> Option<RouteEntry> {
        let method = method.to_uppercase();
        let segments = parse_path_template(path);
        let node = self.traverse_or_create(&segments);
        let previous = node.methods.insert(method.clone(), entry);
        if previous.is_none() {
            self.routes.push((method, normalize_path(path)));
        }
        previous
    }

    /// Registered `(method, path template)` pairs, in insertion order.
    pub fn routes(&self) -> &[(String, String)] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Look up a concrete request path.
    pub fn lookup(&self, path: &str, method: &str) -> RouteMatch {
        let normalized = normalize_path(path);
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();

        let mut params = Vec::new();
        let node = match traverse_and_match(&self.root, &segments, &mut params) {
            Some(node) if !node.methods.is_empty() => node,
            _ => return RouteMatch::NotFound,
        };

        let entry = node
            .methods
            .get(&method.to_uppercase())
            .or_else(|| node.methods.get(ANY_METHOD));
        match entry {
            Some(entry) => RouteMatch::Found {
                entry: *entry,
                params,
            },
            None => {
                let mut allowed: Vec<String> = node.methods.keys().cloned().collect();
                allowed.sort();
                RouteMatch::MethodNotAllowed { allowed }
            }
        }
    }

    /// Methods registered for the path a request resolves to (empty if none).
    pub fn allowed_methods(&self, path: &str) -> Vec<String> {
        let normalized = normalize_path(path);
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Vec::new();
        let mut allowed: Vec<String> = traverse_and_match(&self.root, &segments, &mut params)
            .map(|node| node.methods.keys().cloned().collect())
            .unwrap_or_default();
        allowed.sort();
        allowed
    }

    fn traverse_or_create(&mut self, segments: &[Segment]) -> &mut Node {
        let mut current = &mut self.root;

        for segment in segments {
            current = match segment {
                Segment::Static(name) => current.static_children.entry(name.clone()).or_default(),
                Segment::Param(name) => {
                    &mut current
                        .param_child
                        .get_or_insert_with(|| named(name))
                        .node
                }
                Segment::Greedy(name) => {
                    &mut current
                        .greedy_child
                        .get_or_insert_with(|| named(name))
                        .node
                }
            };
        }

        current
    }
}

fn named(name: &str) -> Box<NamedNode> {
    Box::new(NamedNode {
        name: name.to_string(),
        node: Node::default(),
    })
}

/// Match concrete segments, capturing parameters. Static children win,
/// then the parameter child, then the greedy child.
fn traverse_and_match<'a>(
    node: &'a Node,
    segments: &[&str],
    params: &mut Vec<(String, String)>,
) -> Option<&'a Node> {
    let (segment, remaining) = match segments.split_first() {
        Some(split) => split,
        None => return Some(node),
    };

    if let Some(child) = node.static_children.get(*segment) {
        if let Some(found) = traverse_and_match(child, remaining, params) {
            return Some(found);
        }
    }

    if let Some(param) = &node.param_child {
        let mark = params.len();
        params.push((param.name.clone(), segment.to_string()));
        if let Some(found) = traverse_and_match(&param.node, remaining, params) {
            return Some(found);
        }
        params.truncate(mark);
    }

    if let Some(greedy) = &node.greedy_child {
        let joined = segments.join("/");
        let mark = params.len();
        params.push((greedy.name.clone(), joined));
        if let Some(found) = traverse_and_match(&greedy.node, &[], params) {
            return Some(found);
        }
        params.truncate(mark);
    }

    None
}

fn parse_path_template(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(inner) => match inner.strip_suffix('+') {
                Some(base) => Segment::Greedy(base.to_string()),
                None => Segment::Param(inner.to_string()),
            },
            None => Segment::Static(s.to_string()),
        })
        .collect()
}

/// Normalize a request path: collapse repeated slashes, strip the trailing
/// slash (root stays `/`).
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut prev_slash = false;

    for ch in path.chars() {
        if ch == '/' {
            if !prev_slash {
                normalized.push('/');
            }
            prev_slash = true;
        } else {
            normalized.push(ch);
            prev_slash = false;
        }
    }

    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    if normalized.is_empty() {
        "/".to_string()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(endpoint_index: usize) -> RouteEntry {
        RouteEntry { endpoint_index }
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_path("/users/"), "/users");
        assert_eq!(normalize_path("/users//123//orders/"), "/users/123/orders");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn static_and_param_routes() {
        let mut router = Router::new();
        router.insert("/users/me", "GET", entry(0));
        router.insert("/users/{id}", "GET", entry(1));

        assert_eq!(
            router.lookup("/users/me", "GET"),
            RouteMatch::Found {
                entry: entry(0),
                params: vec![]
            }
        );
        assert_eq!(
            router.lookup("/users/123/", "get"),
            RouteMatch::Found {
                entry: entry(1),
                params: params(&[("id", "123")])
            }
        );
    }

    #[test]
    fn multiple_parameters() {
        let mut router = Router::new();
        router.insert("/users/{userId}/orders/{orderId}", "GET", entry(0));
        match router.lookup("/users/42/orders/99", "GET") {
            RouteMatch::Found { params: p, .. } => {
                assert_eq!(p, params(&[("userId", "42"), ("orderId", "99")]))
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn not_found_and_method_not_allowed() {
        let mut router = Router::new();
        router.insert("/users", "GET", entry(0));
        router.insert("/users", "POST", entry(1));

        assert_eq!(router.lookup("/posts", "GET"), RouteMatch::NotFound);
        // intermediate nodes carry no methods
        assert_eq!(router.lookup("/", "GET"), RouteMatch::NotFound);
        assert_eq!(
            router.lookup("/users", "DELETE"),
            RouteMatch::MethodNotAllowed {
                allowed: vec!["GET".into(), "POST".into()]
            }
        );
    }

    #[test]
    fn any_is_a_fallback() {
        let mut router = Router::new();
        router.insert("/things", "ANY", entry(0));
        router.insert("/things", "DELETE", entry(1));

        assert_eq!(
            router.lookup("/things", "PATCH"),
            RouteMatch::Found {
                entry: entry(0),
                params: vec![]
            }
        );
        assert_eq!(
            router.lookup("/things", "DELETE"),
            RouteMatch::Found {
                entry: entry(1),
                params: vec![]
            }
        );
    }

    #[test]
    fn greedy_segments() {
        let mut router = Router::new();
        router.insert("/files/special", "GET", entry(0));
        router.insert("/files/{name}", "GET", entry(1));
        router.insert("/files/{path+}", "GET", entry(2));

        assert_eq!(
            router.lookup("/files/special", "GET"),
            RouteMatch::Found {
                entry: entry(0),
                params: vec![]
            }
        );
        assert_eq!(
            router.lookup("/files/readme.txt", "GET"),
            RouteMatch::Found {
                entry: entry(1),
                params: params(&[("name", "readme.txt")])
            }
        );
        assert_eq!(
            router.lookup("/files/a/b/c.txt", "GET"),
            RouteMatch::Found {
                entry: entry(2),
                params: params(&[("path", "a/b/c.txt")])
            }
        );
    }

    #[test]
    fn greedy_after_param() {
        let mut router = Router::new();
        router.insert("/files/{bucket}/{key+}", "GET", entry(0));
        match router.lookup("/files/my-bucket/folder/file.txt", "GET") {
            RouteMatch::Found { params: p, .. } => assert_eq!(
                p,
                params(&[("bucket", "my-bucket"), ("key", "folder/file.txt")])
            ),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn insert_reports_duplicates_and_lists_routes() {
        let mut router = Router::new();
        assert_eq!(router.insert("/a/", "get", entry(0)), None);
        assert_eq!(router.insert("/b", "POST", entry(1)), None);
        assert_eq!(router.insert("/a", "GET", entry(2)), Some(entry(0)));
        assert_eq!(
            router.routes(),
            &[
                ("GET".to_string(), "/a".to_string()),
                ("POST".to_string(), "/b".to_string())
            ]
        );
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn allowed_methods_for_preflight() {
        let mut router = Router::new();
        router.insert("/items/{id}", "PUT", entry(0));
        router.insert("/items/{id}", "GET", entry(1));
        assert_eq!(router.allowed_methods("/items/7"), vec!["GET", "PUT"]);
        assert!(router.allowed_methods("/nope").is_empty());
    }
}
