//! pulse-router: Zero-dependency exact-path HTTP router
//!
//! Routes are keyed by HTTP method, then by normalized path. There are no
//! parameters or wildcards: a request either names a registered path exactly
//! or it does not match, in which case the caller decides the fallback
//! (pulse-core falls through to static files).
//!
//! ## Normalization
//! - Empty segments are dropped, so `//json/` and `/json` are the same route
//! - Method names are case-insensitive
//! - `HEAD` falls back to the `GET` table
//!
//! ## Example
//! ```
//! use pulse_router::Router;
//!
//! let mut router = Router::new();
//! router.insert("GET", "/", "home").unwrap();
//! router.insert("GET", "/json", "json").unwrap();
//!
//! assert_eq!(router.find("GET", "/json"), Some(&"json"));
//! assert_eq!(router.find("HEAD", "/json/"), Some(&"json"));
//! assert!(router.find("GET", "/missing").is_none());
//! ```

use std::collections::HashMap;
use std::fmt;

/// Error returned when a path is registered twice for the same method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRoute {
    pub method: String,
    pub path: String,
}

impl fmt::Display for DuplicateRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route already registered: {} {}", self.method, self.path)
    }
}

impl std::error::Error for DuplicateRoute {}

/// Exact-path router
///
/// Values are usually handler ids or shared handler objects.
#[derive(Debug)]
pub struct Router<T> {
    /// Method -> normalized path -> value
    tables: HashMap<String, HashMap<String, T>>,
}

impl<T> Router<T> {
    /// Create a new router
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Insert a route
    ///
    /// Registering the same method and path twice is an error; the first
    /// value is kept.
    pub fn insert(&mut self, method: &str, path: &str, value: T) -> Result<(), DuplicateRoute> {
        let method = method.to_uppercase();
        let key = normalize(path);
        let table = self.tables.entry(method.clone()).or_default();
        if table.contains_key(&key) {
            return Err(DuplicateRoute { method, path: key });
        }
        table.insert(key, value);
        Ok(())
    }

    /// Find the value registered for `method` and `path`
    pub fn find(&self, method: &str, path: &str) -> Option<&T> {
        let method = method.to_uppercase();
        let key = normalize(path);
        let hit = self.tables.get(&method).and_then(|t| t.get(&key));
        if hit.is_none() && method == "HEAD" {
            return self.tables.get("GET").and_then(|t| t.get(&key));
        }
        hit
    }

    /// Number of registered routes across all methods
    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
