use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse},
};
use maud::{DOCTYPE, PreEscaped, html};

use crate::AppState;
use crate::command::{ALERT_MARKER, CLEAR_TOKEN, DEFAULT_CONTENT, DUMP_TOKEN, LINE_BREAK, REDRUM_TOKEN};

const CSS: &str = r#"
body {
    font-family: monospace;
    margin: 1em;
}
body.alert {
    background-color: red;
    color: white;
    font-size: 72px;
}
"#;

// Client interpreter. Keep in step with `command::Display`.
const JAVASCRIPT: &str = r#"
(function () {
    const display = document.getElementById("display");
    const host = document.body.dataset.host;
    let alertMode = false;

    function clearDisplay() {
        alertMode = false;
        document.body.classList.remove("alert");
        display.innerHTML = SNIPE.initial;
        console.clear();
    }

    function apply(payload) {
        if (payload === "") {
            return;
        }
        const command = payload.trim().toLowerCase();

        if (command === SNIPE.clear) {
            clearDisplay();
            return;
        }

        if (command === SNIPE.redrum || alertMode) {
            if (!alertMode) {
                alertMode = true;
                document.body.classList.add("alert");
                display.innerHTML = SNIPE.alert;
            } else {
                display.innerHTML += " " + SNIPE.alert;
            }
            console.log(SNIPE.alert);
            return;
        }

        if (command === SNIPE.dump) {
            console.log(document.documentElement.outerHTML);
            return;
        }

        display.innerHTML += payload + SNIPE.lineBreak;
    }

    const ws = new WebSocket("ws://" + host + "/ws");
    ws.onmessage = function (event) {
        if (typeof event.data === "string") {
            apply(event.data);
        }
    };
    ws.onclose = function () {
        display.textContent = "Connection closed";
    };
})();
"#;

/// Constants shared with the Rust side, rendered as a script prelude.
fn script_prelude() -> String {
    let constants = serde_json::json!({
        "clear": CLEAR_TOKEN,
        "dump": DUMP_TOKEN,
        "redrum": REDRUM_TOKEN,
        "alert": ALERT_MARKER,
        "lineBreak": LINE_BREAK,
        "initial": DEFAULT_CONTENT,
    });
    format!("const SNIPE = {constants};")
}

/// `GET /`: the display page. The script connects back to whatever host the
/// browser used to load it.
pub async fn home_page(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("localhost:{}", state.config.bind_addr.port()));

    let markup = html! {
        (DOCTYPE)
        html {
            head {
                title { "snipe" }
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                style { (PreEscaped(CSS)) }
            }
            body data-host=(host) {
                div id="display" { (PreEscaped(DEFAULT_CONTENT)) }
                script { (PreEscaped(script_prelude())) }
                script { (PreEscaped(JAVASCRIPT)) }
            }
        }
    };

    Html(markup.into_string())
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnipeConfig;
    use crate::create_router;
    use crate::line_source::LineReader;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = SnipeConfig {
            bind_addr: "127.0.0.1:9090".parse().unwrap(),
            liveness: Default::default(),
            relay: Default::default(),
        };
        let source = LineReader::from_reader(std::io::Cursor::new(Vec::new()), std::io::sink(), "");
        AppState::new(config, source)
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn home_page_embeds_request_host() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "example.test:1234")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains(r#"data-host="example.test:1234""#));
        assert!(body.contains(r#"<div id="display">"#));
        assert!(body.contains(DEFAULT_CONTENT));
        assert!(body.contains(r##""clear":"#cmd clear""##));
        assert!(body.contains("background-color: red"));
        assert!(body.contains(r#"display.textContent = "Connection closed";"#));
    }

    #[tokio::test]
    async fn home_page_falls_back_to_bound_port() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains(r#"data-host="localhost:9090""#));
    }

    #[tokio::test]
    async fn host_header_is_escaped() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "evil\"><script>")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_string(response).await;
        assert!(!body.contains("evil\"><script>"));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Not found");
    }

    #[tokio::test]
    async fn post_to_page_is_method_not_allowed() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn prelude_is_valid_json_assignment() {
        let prelude = script_prelude();
        let json = prelude
            .strip_prefix("const SNIPE = ")
            .and_then(|s| s.strip_suffix(';'))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["alert"], ALERT_MARKER);
        assert_eq!(value["lineBreak"], LINE_BREAK);
    }
}
