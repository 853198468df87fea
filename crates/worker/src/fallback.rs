//! Responses the worker builds itself.

use stowaway_core::{FailureCode, FallbackBody};

use crate::fetch::{Response, ResponseSource};

/// Status used for a failure: 408 for timeouts on the network-bound paths, else 503.
pub fn failure_status(code: FailureCode, timeout_as_408: bool) -> u16 {
    if timeout_as_408 && code == FailureCode::Timeout { 408 } else { 503 }
}

/// JSON failure body `{message, offline: true, code}`.
pub fn failure_response(status: u16, code: FailureCode) -> Response {
    let body = serde_json::to_vec(&FallbackBody::new(code)).unwrap_or_default();
    Response::new(
        status,
        vec![("Content-Type".to_string(), "application/json".to_string())],
        body,
        ResponseSource::Synthesized,
    )
}

/// Last-resort offline document when no offline page is cached.
pub fn builtin_offline_page(app_name: &str) -> Response {
    let title = escape_html(app_name);
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Offline - {title}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
        body {{ font-family: Arial, sans-serif; text-align: center; padding: 50px; }}
        .offline {{ color: #666; }}
    </style>
</head>
<body>
    <div class="offline">
        <h1>You're Offline</h1>
        <p>Please check your internet connection and try again.</p>
        <button onclick="window.location.reload()">Retry</button>
    </div>
</body>
</html>
"#
    );
    html_response(200, html)
}

/// Document that hands a route outside the app back to the system browser.
pub fn open_in_browser(url: &str) -> Response {
    let attr = escape_html(url);
    let js = serde_json::to_string(url).unwrap_or_else(|_| "\"/\"".to_string());
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta http-equiv="refresh" content="0;url={attr}">
    <script>window.open({js}, '_system');</script>
</head>
<body>
    <p>Opening <a href="{attr}">{attr}</a> in your browser...</p>
</body>
</html>
"#
    );
    html_response(200, html)
}

fn html_response(status: u16, html: String) -> Response {
    Response::new(
        status,
        vec![("Content-Type".to_string(), "text/html; charset=utf-8".to_string())],
        html,
        ResponseSource::Synthesized,
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
