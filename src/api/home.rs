//! Homepage

use axum::{Router, extract::State, response::Html, routing::get};

use crate::AppState;

/// Create homepage router
pub fn home_router() -> Router<AppState> {
    Router::new().route("/", get(homepage))
}

/// `scheme://host[:port]` of an inbox URL and its hostname
fn instance_link(inbox: &str) -> Option<(String, String)> {
    let url = url::Url::parse(inbox).ok()?;
    let host = url.host_str()?.to_string();
    let origin = match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    };
    Some((origin, host))
}

/// GET /
async fn homepage(State(state): State<AppState>) -> Html<String> {
    let host = html_escape::encode_text(&state.config.ap.host);
    let note = html_escape::encode_text(&state.config.note);

    let inboxes = state.registry.list().await;
    let instances: String = inboxes
        .iter()
        .filter_map(|inbox| instance_link(inbox))
        .map(|(origin, name)| {
            format!(
                "<li><a href=\"{}\">{}</a></li>",
                html_escape::encode_double_quoted_attribute(&origin),
                html_escape::encode_text(&name)
            )
        })
        .collect();

    Html(format!(
        r#"<html><head>
<title>ActivityPub Relay at {host}</title>
<style>
p {{ color: #FFFFFF; font-family: monospace, arial; font-size: 100%; }}
body {{ background-color: #000000; }}
a {{ color: #26F; }}
a:visited {{ color: #46C; }}
a:hover {{ color: #8AF; }}
</style>
</head>
<body>
<p>This is an Activity Relay for fediverse instances.</p>
<p>{note}</p>
<p>For Mastodon and Misskey instances, you may subscribe to this relay with the address: <a href="https://{host}/inbox">https://{host}/inbox</a></p>
<p>For Pleroma and other instances, you may subscribe to this relay with the address: <a href="https://{host}/actor">https://{host}/actor</a></p>
<br><p>List of {count} registered instances:<br><ul>{instances}</ul></p>
</body></html>"#,
        count = inboxes.len(),
    ))
}
