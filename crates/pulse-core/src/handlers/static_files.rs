//! Static file serving handler
//!
//! Serves files below a root directory for requests no route claimed.

use crate::request::percent_decode;
use crate::{Error, Method, Request, Response, ResponseBuilder, Result, StatusCode};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Static file configuration
#[derive(Debug, Clone)]
pub struct StaticFileConfig {
    /// Root directory
    pub root: PathBuf,
    /// Index file name
    pub index: String,
    /// Cache max-age in seconds (0 omits the header)
    pub max_age: u32,
    /// Enable ETag
    pub etag: bool,
    /// Serve dot files
    pub hidden: bool,
}

impl Default for StaticFileConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            index: "index.html".to_string(),
            max_age: 0,
            etag: true,
            hidden: false,
        }
    }
}

impl StaticFileConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }
}

/// Static file handler
#[derive(Debug, Clone)]
pub struct StaticFiles {
    config: StaticFileConfig,
}

impl StaticFiles {
    pub fn new(config: StaticFileConfig) -> Self {
        Self { config }
    }

    /// Serve static files from directory
    pub fn serve(root: impl Into<PathBuf>) -> Self {
        Self::new(StaticFileConfig::new(root))
    }

    /// Handle request for static file
    ///
    /// Misses (including rejected paths) are `Error::NotFound`.
    pub async fn handle(&self, req: &Request) -> Result<Response> {
        if !req.method.is_read() {
            return Err(Error::MethodNotAllowed(req.method.to_string()));
        }

        let not_found = || Error::NotFound(req.path.clone());
        let relative = self.sanitize_path(&req.path).ok_or_else(not_found)?;
        let mut full_path = self.config.root.join(relative);

        let mut meta = tokio::fs::metadata(&full_path).await.map_err(|_| not_found())?;
        if meta.is_dir() {
            full_path.push(&self.config.index);
            meta = tokio::fs::metadata(&full_path).await.map_err(|_| not_found())?;
        }
        if !meta.is_file() {
            return Err(not_found());
        }

        let etag = self.config.etag.then(|| generate_etag(&meta));
        if let (Some(etag), Some(if_none_match)) = (&etag, req.header("if-none-match")) {
            if if_none_match.split(',').any(|tag| tag.trim() == etag.as_str() || tag.trim() == "*") {
                return Ok(ResponseBuilder::new(StatusCode::NOT_MODIFIED)
                    .header("ETag", etag.as_str())
                    .build());
            }
        }

        let content = tokio::fs::read(&full_path).await.map_err(|e| {
            debug!(path = %full_path.display(), error = %e, "static read failed");
            not_found()
        })?;

        let mut builder = ResponseBuilder::new(StatusCode::OK)
            .header("Content-Type", content_type(&full_path));

        if let Some(etag) = etag {
            builder = builder.header("ETag", etag);
        }

        if self.config.max_age > 0 {
            builder = builder.header("Cache-Control", format!("max-age={}", self.config.max_age));
        }

        // HEAD request - no body
        if req.method == Method::Head {
            Ok(builder.build())
        } else {
            Ok(builder.body(content).build())
        }
    }

    /// Decode and sanitize the request path
    ///
    /// Each segment is percent-decoded on its own; a segment that decodes to
    /// a separator, a parent reference or (unless `hidden`) a dot file is
    /// rejected.
    fn sanitize_path(&self, path: &str) -> Option<PathBuf> {
        let mut result = PathBuf::new();

        for raw in path.split('/').filter(|s| !s.is_empty()) {
            let segment = percent_decode(raw);
            if segment == "." {
                continue;
            }
            if segment == ".." || segment.contains(|c| matches!(c, '/' | '\\' | '\0')) {
                return None;
            }
            if !self.config.hidden && segment.starts_with('.') {
                return None;
            }

            let mut components = Path::new(&segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(c)), None) => result.push(c),
                _ => return None,
            }
        }

        Some(result)
    }
}

fn generate_etag(meta: &std::fs::Metadata) -> String {
    use std::time::UNIX_EPOCH;

    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    format!("\"{:x}-{:x}\"", mtime, meta.len())
}

/// Content type inferred from the file extension
fn content_type(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_().as_str() == "text" {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestBuilder;

    fn get(path: &str) -> Request {
        RequestBuilder::new(Method::Get, path).build()
    }

    fn assets() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>chat</h1>").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/style.css"), "body{}").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        dir
    }

    #[test]
    fn test_sanitize_path() {
        let handler = StaticFiles::serve(".");

        assert!(handler.sanitize_path("/index.html").is_some());
        assert!(handler.sanitize_path("/css/style.css").is_some());
        assert!(handler.sanitize_path("/../etc/passwd").is_none());
        assert!(handler.sanitize_path("/css/../../etc/passwd").is_none());
        assert!(handler.sanitize_path("/.hidden").is_none());
    }

    #[test]
    fn test_sanitize_decodes_segments() {
        let handler = StaticFiles::serve(".");

        assert_eq!(
            handler.sanitize_path("/my%20file.txt"),
            Some(PathBuf::from("my file.txt"))
        );
        assert_eq!(
            handler.sanitize_path("/docs/caf%C3%A9.html"),
            Some(PathBuf::from("docs/café.html"))
        );
        assert!(handler.sanitize_path("/%2e%2e/etc/passwd").is_none());
        assert!(handler.sanitize_path("/css/..%2F..%2Fetc").is_none());
        assert!(handler.sanitize_path("/a%5C..%5Cb").is_none());
        assert!(handler.sanitize_path("/%2Eenv").is_none());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("style.css")), "text/css; charset=utf-8");
        assert_eq!(content_type(Path::new("notes.txt")), "text/plain; charset=utf-8");
        assert_eq!(content_type(Path::new("image.png")), "image/png");
        assert_eq!(content_type(Path::new("unknown")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_serves_file_bytes() {
        let dir = assets();
        let handler = StaticFiles::serve(dir.path());

        let res = handler.handle(&get("/css/style.css")).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.content_type(), Some("text/css; charset=utf-8"));
        assert_eq!(res.body_string().as_deref(), Some("body{}"));
        assert!(res.header("etag").is_some());
        assert!(res.header("cache-control").is_none());
    }

    #[tokio::test]
    async fn test_serves_percent_encoded_names() {
        let dir = assets();
        std::fs::write(dir.path().join("my file.txt"), "spaced").unwrap();
        let handler = StaticFiles::serve(dir.path());

        let res = handler.handle(&get("/my%20file.txt")).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body_string().as_deref(), Some("spaced"));
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let dir = assets();
        let handler = StaticFiles::serve(dir.path());

        let res = handler.handle(&get("/")).await.unwrap();
        assert_eq!(res.body_string().as_deref(), Some("<h1>chat</h1>"));
    }

    #[tokio::test]
    async fn test_missing_and_hidden_are_not_found() {
        let dir = assets();
        let handler = StaticFiles::serve(dir.path());

        assert!(matches!(handler.handle(&get("/nope.js")).await, Err(Error::NotFound(_))));
        assert!(matches!(handler.handle(&get("/.env")).await, Err(Error::NotFound(_))));
        assert!(matches!(handler.handle(&get("/css")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_if_none_match() {
        let dir = assets();
        let handler = StaticFiles::new(StaticFileConfig::new(dir.path()).max_age(60));

        let first = handler.handle(&get("/index.html")).await.unwrap();
        assert_eq!(first.header("cache-control"), Some("max-age=60"));
        let etag = first.header("etag").unwrap().to_string();

        let req = RequestBuilder::new(Method::Get, "/index.html")
            .header("If-None-Match", etag)
            .build();
        let second = handler.handle(&req).await.unwrap();
        assert_eq!(second.status, StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let dir = assets();
        let handler = StaticFiles::serve(dir.path());

        let req = RequestBuilder::new(Method::Head, "/index.html").build();
        let res = handler.handle(&req).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body_string().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_post_not_allowed() {
        let handler = StaticFiles::serve(".");
        let req = RequestBuilder::new(Method::Post, "/index.html").build();
        assert!(matches!(handler.handle(&req).await, Err(Error::MethodNotAllowed(_))));
    }
}
