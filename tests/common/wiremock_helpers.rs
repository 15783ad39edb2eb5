use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mounts one HTML page at `url_path` on an existing server.
pub async fn mount_html_page(server: &MockServer, url_path: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(html.to_string(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Creates a mock site serving each `(path, html)` pair.
///
/// Unmatched paths get wiremock's default 404.
pub async fn mock_site(pages: &[(&str, &str)]) -> MockServer {
    let server = MockServer::start().await;
    for (url_path, html) in pages {
        mount_html_page(&server, url_path, html).await;
    }
    server
}

/// Creates a mock server whose every GET returns `status_code`.
pub async fn mock_error_server(status_code: u16) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status_code).set_body_string("error"))
        .mount(&server)
        .await;

    server
}

/// Creates a mock server that delays responses by `delay_ms`.
pub async fn mock_timeout_server(delay_ms: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .insert_header("content-type", "text/html")
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(&server)
        .await;

    server
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_site_serves_pages() {
        let server = mock_site(&[("/", "<a href=\"/about\">about</a>")]).await;
        let body = reqwest::get(format!("{}/", server.uri())).await.unwrap().text().await.unwrap();
        assert!(body.contains("/about"));
    }

    #[tokio::test]
    async fn test_mock_error_server_returns_status() {
        let server = mock_error_server(503).await;
        let response = reqwest::get(server.uri()).await.unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }
}
