//! UI routes - upload page and its static assets
//!
//! Assets are embedded at compile time.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};

use crate::driver::MAX_STAGED_FILES;
use crate::AppState;

const INDEX_HTML: &str = include_str!("../../static/index.html");
const APP_JS: &str = include_str!("../../static/app.js");
const WAVDROP_CSS: &str = include_str!("../../static/wavdrop.css");

/// Build UI routes
pub fn ui_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root_page))
        .route("/static/app.js", get(serve_app_js))
        .route("/static/wavdrop.css", get(serve_css))
}

/// GET /
async fn root_page() -> Html<String> {
    Html(render_index())
}

/// Page HTML with the upload slots and build details filled in
pub fn render_index() -> String {
    let slots: String = (0..MAX_STAGED_FILES)
        .map(|i| {
            format!(
                r#"        <label class="slot">Upload file #{n} (optional)
            <input type="file" name="file{i}" accept=".wav,.mp3,.ogg">
        </label>
"#,
                n = i + 1,
                i = i
            )
        })
        .collect();

    INDEX_HTML
        .replace("{{UPLOAD_SLOTS}}", &slots)
        .replace("{{MAX_FILES}}", &MAX_STAGED_FILES.to_string())
        .replace("{{VERSION}}", env!("CARGO_PKG_VERSION"))
        .replace("{{GIT_HASH}}", env!("GIT_HASH"))
}

/// GET /static/app.js
async fn serve_app_js() -> Response {
    static_asset("application/javascript", APP_JS)
}

/// GET /static/wavdrop.css
async fn serve_css() -> Response {
    static_asset("text/css", WAVDROP_CSS)
}

fn static_asset(content_type: &'static str, body: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            ("content-type", content_type),
            ("cache-control", "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_has_five_slots_and_trigger() {
        let html = render_index();
        for i in 0..MAX_STAGED_FILES {
            assert!(html.contains(&format!(r#"name="file{}""#, i)));
        }
        assert!(!html.contains(r#"name="file5""#));
        assert_eq!(html.matches(r#"accept=".wav,.mp3,.ogg""#).count(), 5);
        assert!(html.contains("Process &amp; Upload"));
        assert!(!html.contains("{{"));
    }
}
