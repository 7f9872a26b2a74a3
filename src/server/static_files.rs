//! Static frontend server with clean URLs
//!
//! Clean paths such as `/about` are mapped onto files through a route table.
//! Anything that does not resolve falls back to `index.html` so client-side
//! routes keep working on reload.

use crate::error::{BgRemovalError, Result};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

const INDEX_FILE: &str = "index.html";

/// Clean URL to file mappings served by default
pub const DEFAULT_ROUTES: &[(&str, &str)] = &[
    ("crop", "crop"),
    ("convert", "convert"),
    ("privacy", "privacy"),
    ("terms", "terms"),
    ("about", "about.html"),
    ("contact", "contact.html"),
    ("compress", INDEX_FILE),
    ("resize", INDEX_FILE),
];

/// Route table mapping request names to files under the site root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoutes {
    routes: BTreeMap<String, String>,
}

impl Default for StaticRoutes {
    fn default() -> Self {
        Self {
            routes: DEFAULT_ROUTES
                .iter()
                .map(|(name, file)| ((*name).to_string(), (*file).to_string()))
                .collect(),
        }
    }
}

impl StaticRoutes {
    /// Parse a `name=file` override
    ///
    /// # Errors
    /// - Missing `=` or an empty side
    pub fn parse_override(value: &str) -> Result<(String, String)> {
        let (name, file) = value
            .split_once('=')
            .map(|(name, file)| (name.trim().trim_start_matches('/'), file.trim()))
            .filter(|(name, file)| !name.is_empty() && !file.is_empty())
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Invalid route '{value}': expected name=file"
                ))
            })?;
        Ok((name.to_string(), file.to_string()))
    }

    /// Add or replace entries
    #[must_use]
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.routes.extend(overrides);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.routes.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A directory served with clean URL resolution
#[derive(Debug, Clone)]
pub struct StaticSite {
    root: PathBuf,
    routes: StaticRoutes,
}

impl StaticSite {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P, routes: StaticRoutes) -> Self {
        Self {
            root: root.into(),
            routes,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn routes(&self) -> &StaticRoutes {
        &self.routes
    }

    /// Map a request path onto a file, or `None` when nothing can be served
    #[must_use]
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(request_path)
            .map_or_else(|_| request_path.to_string(), |d| d.into_owned());
        let name = decoded.trim_start_matches('/');
        let name = if name.is_empty() { INDEX_FILE } else { name };

        let mut file_name = self.routes.get(name).unwrap_or(name).to_string();

        if !file_name.contains('.') {
            let with_html = format!("{file_name}.html");
            if self.join(&with_html).is_some_and(|p| p.exists()) {
                file_name = with_html;
            }
        }

        if let Some(path) = self.join(&file_name).filter(|p| p.is_file()) {
            return Some(path);
        }

        let index = self.root.join(INDEX_FILE);
        index.is_file().then_some(index)
    }

    /// Join `relative` onto the root, refusing anything that could leave it
    fn join(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
            .then(|| self.root.join(relative))
    }
}

/// Router serving `site` for every path
pub fn static_router(site: StaticSite) -> Router {
    Router::new()
        .fallback(serve_static)
        .with_state(Arc::new(site))
}

async fn serve_static(State(site): State<Arc<StaticSite>>, request: Request) -> Response {
    let Some(path) = site.resolve(request.uri().path()) else {
        return (
            StatusCode::NOT_FOUND,
            format!("File not found: {}", request.uri().path()),
        )
            .into_response();
    };

    let service = if path.extension().is_none() {
        ServeFile::new_with_mime(&path, &mime::TEXT_HTML)
    } else {
        ServeFile::new(&path)
    };

    match service.oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn site_with(files: &[&str]) -> (TempDir, StaticSite) {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, file.as_bytes()).unwrap();
        }
        let site = StaticSite::new(dir.path(), StaticRoutes::default());
        (dir, site)
    }

    #[test]
    fn test_root_serves_index() {
        let (dir, site) = site_with(&["index.html"]);
        assert_eq!(site.resolve("/"), Some(dir.path().join("index.html")));
        assert_eq!(site.resolve(""), Some(dir.path().join("index.html")));
    }

    #[test]
    fn test_route_table_mappings() {
        let (dir, site) = site_with(&["index.html", "about.html", "crop"]);
        assert_eq!(site.resolve("/about"), Some(dir.path().join("about.html")));
        assert_eq!(site.resolve("/crop"), Some(dir.path().join("crop")));
        assert_eq!(site.resolve("/compress"), Some(dir.path().join("index.html")));
    }

    #[test]
    fn test_html_extension_fallback() {
        let (dir, site) = site_with(&["index.html", "pricing.html", "privacy.html"]);
        assert_eq!(site.resolve("/pricing"), Some(dir.path().join("pricing.html")));
        // Routed names still get the .html fallback
        assert_eq!(site.resolve("/privacy"), Some(dir.path().join("privacy.html")));
    }

    #[test]
    fn test_unknown_path_falls_back_to_index() {
        let (dir, site) = site_with(&["index.html"]);
        assert_eq!(site.resolve("/editor/42"), Some(dir.path().join("index.html")));
        assert_eq!(site.resolve("/missing.js"), Some(dir.path().join("index.html")));
    }

    #[test]
    fn test_no_index_means_not_found() {
        let (_dir, site) = site_with(&["style.css"]);
        assert_eq!(site.resolve("/nothing"), None);
    }

    #[test]
    fn test_percent_decoding() {
        let (dir, site) = site_with(&["index.html", "my file.css"]);
        assert_eq!(site.resolve("/my%20file.css"), Some(dir.path().join("my file.css")));
    }

    #[test]
    fn test_traversal_takes_fallback() {
        let outer = TempDir::new().unwrap();
        fs::write(outer.path().join("secret.txt"), b"secret").unwrap();
        let root = outer.path().join("site");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("index.html"), b"index").unwrap();
        let site = StaticSite::new(&root, StaticRoutes::default());

        assert_eq!(site.resolve("/../secret.txt"), Some(root.join("index.html")));
        assert_eq!(site.resolve("/%2e%2e/secret.txt"), Some(root.join("index.html")));
        let absolute = format!("/{}", outer.path().join("secret.txt").display());
        assert_eq!(site.resolve(&absolute), Some(root.join("index.html")));
    }

    #[test]
    fn test_route_overrides() {
        let (name, file) = StaticRoutes::parse_override("pricing=plans.html").unwrap();
        let routes = StaticRoutes::default()
            .with_overrides([(name, file), ("about".to_string(), "team.html".to_string())]);
        assert_eq!(routes.get("pricing"), Some("plans.html"));
        assert_eq!(routes.get("about"), Some("team.html"));
        assert_eq!(routes.get("crop"), Some("crop"));

        assert!(StaticRoutes::parse_override("pricing").is_err());
        assert!(StaticRoutes::parse_override("=plans.html").is_err());
    }
}
