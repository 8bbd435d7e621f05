//! Intercepted request model and the cache-key convention.

use serde::{Deserialize, Serialize};

/// What the page intends to do with the response (fetch metadata `Sec-Fetch-Dest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    /// `fetch()` / XHR and anything unrecognized.
    Empty,
}

impl Destination {
    /// Parses a `Sec-Fetch-Dest` header value.
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Self::Document,
            "image" => Self::Image,
            "script" | "worker" | "sharedworker" => Self::Script,
            "style" => Self::Style,
            "font" => Self::Font,
            "manifest" => Self::Manifest,
            _ => Self::Empty,
        }
    }

    /// Best guess from the path extension when the client sent no fetch metadata.
    pub fn guess_from_path(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or("");
        let ext = match file.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return Self::Empty,
        };
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" => Self::Image,
            "js" | "mjs" => Self::Script,
            "css" => Self::Style,
            "woff" | "woff2" | "ttf" | "otf" => Self::Font,
            "webmanifest" => Self::Manifest,
            "html" | "htm" => Self::Document,
            _ => Self::Empty,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image)
    }
}

/// A request the page issued, as seen by the cache controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Absolute URL; together with `method` this is the cache key.
    pub url: String,
    /// Path component of `url`, used for classification.
    pub path: String,
    /// Full-page load (`Sec-Fetch-Mode: navigate`).
    pub navigate: bool,
    pub destination: Destination,
    /// Headers forwarded to the network.
    pub headers: Vec<(String, String)>,
    /// Request body; only meaningful for pass-through (non-GET) requests.
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    /// A plain `GET` for `url` with no fetch metadata.
    pub fn get(url: impl Into<String>) -> Self {
        let url = url.into();
        let path = path_of(&url);
        let destination = Destination::guess_from_path(&path);
        Self {
            method: "GET".to_string(),
            url,
            path,
            navigate: false,
            destination,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A full-page navigation to `url`.
    pub fn navigation(url: impl Into<String>) -> Self {
        let mut req = Self::get(url);
        req.navigate = true;
        req.destination = Destination::Document;
        req
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_ascii_uppercase();
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    #[inline]
    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Cache key for this request: method plus absolute URL.
    pub fn cache_key(&self) -> String {
        cache_key(&self.method, &self.url)
    }
}

/// Cache key convention shared by every store: `"{METHOD} {URL}"`.
pub fn cache_key(method: &str, url: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), url)
}

/// Path component of an absolute or origin-relative URL (no query, no fragment).
pub fn path_of(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        return parsed.path().to_string();
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_ignores_query_and_origin() {
        assert_eq!(
            path_of("http://localhost:8000/api/v1/curriculum/grades?board=pctb"),
            "/api/v1/curriculum/grades"
        );
        assert_eq!(path_of("/icons/icon.png?v=2"), "/icons/icon.png");
        assert_eq!(path_of("http://localhost:8000"), "/");
    }

    #[test]
    fn destination_from_fetch_metadata_and_extension() {
        assert_eq!(Destination::from_fetch_dest("image"), Destination::Image);
        assert_eq!(Destination::from_fetch_dest("iframe"), Destination::Document);
        assert_eq!(Destination::from_fetch_dest(""), Destination::Empty);
        assert_eq!(Destination::guess_from_path("/icons/a.SVG"), Destination::Image);
        assert_eq!(Destination::guess_from_path("/_next/static/app.js"), Destination::Script);
        assert_eq!(Destination::guess_from_path("/dashboard"), Destination::Empty);
    }

    #[test]
    fn cache_key_is_method_and_url() {
        let req = FetchRequest::get("http://localhost:8000/manifest.json");
        assert_eq!(req.cache_key(), "GET http://localhost:8000/manifest.json");
        assert_eq!(req.destination, Destination::Empty);
        let post = FetchRequest::get("http://localhost:8000/api/v1/chat").with_method("post");
        assert!(!post.is_get());
    }
}
