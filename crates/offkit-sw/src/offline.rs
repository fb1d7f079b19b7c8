//! Offline fallback document.
//!
//! An unsatisfiable navigation resolves to the pre-cached offline
//! document, or to a self-contained inline one when the static namespace
//! does not hold it. The user always receives a page, never a raw
//! network error.

use http::Method;
use tracing::debug;

use offkit_cache::CacheKey;
use offkit_net::Response;

use crate::config::WorkerConfig;
use crate::{strategy, SharedCaches};

/// Inline fallback. Self-contained: no external stylesheets, scripts, or
/// images; retries on the online event and every 30 seconds.
const OFFLINE_DOCUMENT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Offline</title>
  <style>
    body {
      font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
      display: flex;
      align-items: center;
      justify-content: center;
      min-height: 100vh;
      margin: 0;
      background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
      color: white;
      text-align: center;
    }
    .card {
      max-width: 400px;
      padding: 40px;
      background: rgba(255, 255, 255, 0.1);
      border-radius: 20px;
    }
    h1 { margin: 0 0 10px 0; font-size: 24px; }
    p { margin: 0 0 30px 0; opacity: 0.9; line-height: 1.5; }
    button {
      background: #3b82f6;
      color: white;
      border: none;
      padding: 12px 24px;
      border-radius: 8px;
      font-size: 16px;
      cursor: pointer;
    }
  </style>
</head>
<body>
  <div class="card">
    <h1>You're Offline</h1>
    <p>No internet connection detected. Previously viewed data is still available.</p>
    <button onclick="window.location.reload()">Try Again</button>
  </div>
  <script>
    setInterval(function () {
      if (navigator.onLine) { window.location.reload(); }
    }, 30000);
    window.addEventListener('online', function () { window.location.reload(); });
  </script>
</body>
</html>
"#;

/// The offline document: pre-cached when available, synthesized
/// otherwise.
pub async fn offline_page(caches: &SharedCaches, config: &WorkerConfig) -> Response {
    let offline_url = config.offline_url();

    if let Ok(key) = CacheKey::new(&Method::GET, &offline_url) {
        let storage = caches.read().await;
        if let Some(entry) = storage
            .get(&config.static_cache())
            .and_then(|cache| cache.match_key(&key))
        {
            debug!(url = %offline_url, "serving pre-cached offline document");
            return strategy::response_from_entry(entry, &offline_url);
        }
    }

    debug!(url = %offline_url, "synthesizing offline document");
    Response::html(offline_url, OFFLINE_DOCUMENT)
}
