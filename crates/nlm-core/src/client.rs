//! RPC call driver.
//!
//! One call is `Idle -> Sent -> {Decoded | Failed}`: encode with a snapshot
//! of the session credentials, POST to the batchexecute endpoint, classify
//! the HTTP outcome, then decode frames and pick the envelope for the
//! requested method. Auth expiry triggers exactly one session refresh and one
//! retry; every other failure is returned to the caller as-is.

use std::fmt;
use std::sync::Arc;

use nlm_rpc::{BATCHEXECUTE_PATH, MethodId, ResponseSet, RpcRequest, Tree, decode_response};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, is_login_redirect};
use crate::session::{Credentials, SessionCoordinator};
use crate::{Error, Result};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Sent,
    Decoded,
    Failed,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallPhase::Idle => "idle",
            CallPhase::Sent => "sent",
            CallPhase::Decoded => "decoded",
            CallPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a non-2xx body must contain to be accepted anyway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leniency {
    /// An envelope for the method carrying data
    Data,
    /// Any envelope for the method
    MethodId,
}

pub struct RpcClient<T: ?Sized> {
    transport: Arc<T>,
    session: Arc<SessionCoordinator<T>>,
    base_url: String,
}

impl<T: HttpTransport + ?Sized> RpcClient<T> {
    #[must_use]
    pub fn new(transport: Arc<T>, session: Arc<SessionCoordinator<T>>, config: &Config) -> Self {
        Self {
            transport,
            session,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionCoordinator<T>> {
        &self.session
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call `method` and return its payload; `None` means "succeeded, no data".
    ///
    /// # Errors
    ///
    /// [`Error::MethodNotFound`] if the response has no envelope for
    /// `method`, [`Error::AuthExpired`] if the retry after refresh also
    /// failed, or the classified HTTP/decode error.
    pub async fn call(
        &self,
        method: impl Into<MethodId>,
        params: Tree,
        source_path: Option<&str>,
    ) -> Result<Option<Tree>> {
        let mut request = RpcRequest::new(method, params);
        if let Some(path) = source_path {
            request = request.with_source_path(path);
        }
        self.call_request(&request).await
    }

    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_request(&self, request: &RpcRequest) -> Result<Option<Tree>> {
        self.with_refresh(request, Leniency::Data, |request, set| {
            set.into_result(request.method.as_str()).map_err(Error::from)
        })
        .await
    }

    /// Call and return every envelope in the response without selecting one.
    ///
    /// A non-2xx response is still returned when its body carries an
    /// envelope for the requested method.
    ///
    /// # Errors
    ///
    /// HTTP and framing failures.
    pub async fn call_raw(&self, request: &RpcRequest) -> Result<ResponseSet> {
        self.with_refresh(request, Leniency::MethodId, |_, set| Ok(set))
            .await
    }

    async fn with_refresh<R>(
        &self,
        request: &RpcRequest,
        leniency: Leniency,
        finish: fn(&RpcRequest, ResponseSet) -> Result<R>,
    ) -> Result<R> {
        let (epoch, credentials) = self.session.snapshot().await;
        let first = self
            .attempt(request, &credentials, leniency)
            .await
            .and_then(|set| finish(request, set));

        match first {
            Err(err) if err.is_auth_expired() => {
                debug!(method = %request.method, "Auth expired ({err}), refreshing session");
                self.session.refresh_after(epoch).await?;
                let (_, credentials) = self.session.snapshot().await;
                let set = self.attempt(request, &credentials, leniency).await?;
                finish(request, set)
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        request: &RpcRequest,
        credentials: &Credentials,
        leniency: Leniency,
    ) -> Result<ResponseSet> {
        let method = request.method.as_str();
        trace!(method, phase = %CallPhase::Idle, "Encoding call");

        let http_request = self.build_request(request, credentials);
        let response = self.transport.send(http_request).await.inspect_err(|e| {
            debug!(method, phase = %CallPhase::Failed, "Send failed: {e}");
        })?;
        trace!(method, phase = %CallPhase::Sent, status = response.status, "Response received");

        let result = classify_response(method, &response, leniency);
        match &result {
            Ok(set) => {
                debug!(method, phase = %CallPhase::Decoded, envelopes = set.envelopes().len(), "Call decoded");
            }
            Err(e) => debug!(method, phase = %CallPhase::Failed, "Call failed: {e}"),
        }
        result
    }

    fn build_request(&self, request: &RpcRequest, credentials: &Credentials) -> HttpRequest {
        let url = format!(
            "{}{}?{}",
            self.base_url,
            BATCHEXECUTE_PATH,
            request.encode_query(&credentials.session_id)
        );

        HttpRequest::post(url, request.encode_body(&credentials.csrf_token))
            .with_header("Content-Type", FORM_CONTENT_TYPE)
            .with_header("Cookie", credentials.cookie_header())
            .with_header("Origin", self.base_url.clone())
            .with_header("Referer", format!("{}/", self.base_url))
            .with_header("X-Same-Domain", "1")
    }
}

/// Map an HTTP response to decoded envelopes or a classified error.
fn classify_response(method: &str, response: &HttpResponse, leniency: Leniency) -> Result<ResponseSet> {
    if is_login_redirect(&response.final_url) {
        return Err(Error::AuthExpired(format!(
            "Redirected to login: {}",
            response.final_url
        )));
    }

    if response.is_success() {
        return Ok(decode_response(&response.body)?);
    }

    if let Ok(set) = decode_response(&response.body) {
        let accepted = match leniency {
            Leniency::Data => set.has_data_for(method),
            Leniency::MethodId => set.find(method).is_some(),
        };
        if accepted {
            warn!(
                method,
                status = response.status,
                "HTTP error but response carries the expected envelope, accepting"
            );
            return Ok(set);
        }
    }

    Err(match response.status {
        401 | 403 => Error::AuthExpired(format!("HTTP {}", response.status)),
        429 => Error::RateLimited(format!("HTTP 429 for {method}")),
        status @ 500..=599 => Error::Server { status },
        status => Error::Http { status },
    })
}
