//! Request classification.
//!
//! A pure, total function: every request maps to exactly one routing
//! category, from the URL path and the request's navigation signals alone.

use offkit_net::Request;

/// Path prefixes of immutable build output.
const STATIC_PREFIXES: &[&str] = &["/_next/static/", "/icons/"];

/// Path suffixes of immutable build output.
const STATIC_SUFFIXES: &[&str] = &[".css", ".js", ".woff2", ".png", ".jpg", ".svg"];

/// The app manifest is build output too.
const MANIFEST_PATH: &str = "/manifest.json";

/// Routing category for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Immutable build output: script bundles, stylesheets, fonts, images,
    /// the manifest. Served cache-first.
    StaticAsset,
    /// Top-level page load. Served network-first.
    Navigation,
    /// Everything else (API calls and miscellaneous resources). Served
    /// stale-while-revalidate.
    Other,
}

/// Classify a request into its routing category.
pub fn classify(request: &Request) -> RouteClass {
    if is_static_asset(request.url.path()) {
        RouteClass::StaticAsset
    } else if request.is_navigation() {
        RouteClass::Navigation
    } else {
        RouteClass::Other
    }
}

fn is_static_asset(path: &str) -> bool {
    STATIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
        || STATIC_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
        || path == MANIFEST_PATH
}
