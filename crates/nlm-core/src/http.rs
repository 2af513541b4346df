//! HTTP seam between the call driver and the network.
//!
//! Everything above this module talks to [`HttpTransport`]; production uses
//! [`ReqwestTransport`], tests script responses through a mock.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::Result;

/// Host of the interactive login surface
pub const LOGIN_HOST: &str = "accounts.google.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after following redirects
    pub final_url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// One request, one response. Implementations follow redirects.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// True if `url` points at the login surface rather than the application.
#[must_use]
pub fn is_login_redirect(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    parsed.host_str() == Some(LOGIN_HOST)
        || parsed.path().contains("ServiceLogin")
        || parsed.path().contains("signin")
}

/// True if a page body embeds a redirect to the login surface.
#[must_use]
pub fn contains_login_redirect(html: &str) -> bool {
    html.contains("accounts.google.com/ServiceLogin") || html.contains("accounts.google.com/v3/signin")
}

/// [`HttpTransport`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the TLS backend fails to
    /// initialize.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.method == HttpMethod::Post {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        tracing::trace!(status, url = %final_url, bytes = body.len(), "HTTP response");

        Ok(HttpResponse {
            status,
            final_url,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_redirect_detection() {
        assert!(is_login_redirect(
            "https://accounts.google.com/v3/signin/identifier?continue=x"
        ));
        assert!(is_login_redirect("https://accounts.google.com/ServiceLogin"));
        assert!(is_login_redirect("https://example.test/ServiceLogin?x=1"));
        assert!(!is_login_redirect("https://notebooklm.google.com/"));
        assert!(!is_login_redirect("not a url"));
    }

    #[test]
    fn test_contains_login_redirect() {
        assert!(contains_login_redirect(
            r#"<a href="https://accounts.google.com/ServiceLogin?continue=">"#
        ));
        assert!(!contains_login_redirect("<html>WIZ_global_data</html>"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = HttpRequest::get("https://x.test").with_header("X-Same-Domain", "1");
        assert_eq!(request.header("x-same-domain"), Some("1"));
        assert_eq!(request.header("cookie"), None);

        let response = HttpResponse {
            status: 200,
            final_url: String::new(),
            headers: vec![("x-goog-upload-url".into(), "https://up.test/1".into())],
            body: String::new(),
        };
        assert_eq!(response.header("X-Goog-Upload-URL"), Some("https://up.test/1"));
        assert!(response.is_success());
    }
}
