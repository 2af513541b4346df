//! Session token extraction from the application home page.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use crate::http::{HttpRequest, HttpTransport, contains_login_redirect, is_login_redirect};
use crate::{Error, Result};

const CSRF_PATTERN: &str = r#""SNlM0e"\s*:\s*"([^"]+)""#;
const SESSION_ID_PATTERN: &str = r#""FdrFJe"\s*:\s*"([^"]+)""#;

/// CSRF token and session ID as embedded in the page's global data
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub csrf_token: String,
    pub session_id: String,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("csrf_token", &"<redacted>")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Compiled token patterns
#[derive(Debug, Clone)]
pub struct TokenPatterns {
    csrf: Regex,
    session_id: Regex,
}

impl TokenPatterns {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("invalid token pattern: {e}")))
        };
        Ok(Self {
            csrf: compile(CSRF_PATTERN)?,
            session_id: compile(SESSION_ID_PATTERN)?,
        })
    }

    /// Both extractions are mandatory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthExpired`] if either token is missing.
    pub fn extract(&self, html: &str, final_url: &str) -> Result<SessionTokens> {
        let csrf_token = Self::capture(&self.csrf, html, final_url, "CSRF token")?;
        let session_id = Self::capture(&self.session_id, html, final_url, "Session ID")?;
        Ok(SessionTokens {
            csrf_token,
            session_id,
        })
    }

    fn capture(pattern: &Regex, html: &str, final_url: &str, what: &str) -> Result<String> {
        if let Some(found) = pattern.captures(html).and_then(|c| c.get(1)) {
            return Ok(found.as_str().to_string());
        }

        if is_login_redirect(final_url) || contains_login_redirect(html) {
            return Err(Error::AuthExpired(
                "Authentication expired or invalid, log in again".into(),
            ));
        }
        Err(Error::AuthExpired(format!(
            "{what} not found in page (final URL: {final_url})"
        )))
    }
}

/// `name=value; name=value` for the `Cookie` header.
#[must_use]
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fetch `home_url` with `cookies` and extract fresh session tokens.
///
/// # Errors
///
/// [`Error::AuthExpired`] on a login redirect, 401/403, or a missing token;
/// [`Error::Server`]/[`Error::Http`] for other failing statuses.
pub async fn fetch_tokens<T: HttpTransport + ?Sized>(
    transport: &T,
    patterns: &TokenPatterns,
    home_url: &str,
    cookies: &BTreeMap<String, String>,
) -> Result<SessionTokens> {
    let request = HttpRequest::get(home_url).with_header("Cookie", cookie_header(cookies));
    let response = transport.send(request).await?;

    debug!(status = response.status, url = %response.final_url, "Fetched home page");

    if is_login_redirect(&response.final_url) {
        return Err(Error::AuthExpired(format!(
            "Redirected to login: {}",
            response.final_url
        )));
    }
    match response.status {
        401 | 403 => {
            return Err(Error::AuthExpired(format!(
                "Home page returned HTTP {}",
                response.status
            )));
        }
        status if (500..600).contains(&status) => return Err(Error::Server { status }),
        status if !response.is_success() => return Err(Error::Http { status }),
        _ => {}
    }

    patterns.extract(&response.body, &response.final_url)
}
