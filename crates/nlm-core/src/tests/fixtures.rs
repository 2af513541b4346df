//! Test fixtures and helpers

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nlm_rpc::{Tree, decode_request_body, encode_result_body, write_frames};

use crate::client::RpcClient;
use crate::config::Config;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::session::{Credentials, SessionCoordinator};
use crate::{Error, Result};

pub const BASE_URL: &str = "https://notebooklm.test";

type PostHandler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Scripted [`HttpTransport`].
///
/// GET requests serve a home page whose tokens are numbered by how many
/// GETs came before (`csrf-1`, `sid-1`, ...). POST requests pop the scripted
/// queue first and fall back to the handler.
#[derive(Default)]
pub struct MockTransport {
    posts: Mutex<VecDeque<HttpResponse>>,
    handler: Option<PostHandler>,
    home_status: Option<u16>,
    requests: Mutex<Vec<HttpRequest>>,
    gets: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(
        mut self,
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Serve the home page with this status and no tokens
    pub fn with_home_status(mut self, status: u16) -> Self {
        self.home_status = Some(status);
        self
    }

    pub fn push(&self, response: HttpResponse) {
        self.posts.lock().unwrap().push_back(response);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == HttpMethod::Post)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        if request.method == HttpMethod::Get {
            let n = self.gets.fetch_add(1, Ordering::SeqCst) + 1;
            // Let concurrent refreshers contend for the lock
            tokio::task::yield_now().await;
            return Ok(match self.home_status {
                Some(status) => response_with(status, "<html>nope</html>"),
                None => ok(&home_page(&format!("csrf-{n}"), &format!("sid-{n}"))),
            });
        }

        let scripted = self.posts.lock().unwrap().pop_front();
        if let Some(response) = scripted {
            return Ok(response);
        }
        match &self.handler {
            Some(handler) => Ok(handler(&request)),
            None => Err(Error::Transport("no scripted response".into())),
        }
    }
}

pub fn home_page(csrf: &str, session_id: &str) -> String {
    format!(
        r#"<html><script>window.WIZ_global_data = {{"SNlM0e":"{csrf}","FdrFJe":"{session_id}","qwAQke":"x"}};</script></html>"#
    )
}

pub fn response_with(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        final_url: format!("{BASE_URL}/"),
        headers: Vec::new(),
        body: body.to_string(),
    }
}

pub fn ok(body: &str) -> HttpResponse {
    response_with(200, body)
}

/// 200 response carrying `payload` for `method_id`
pub fn result_response(method_id: &str, payload: Option<&Tree>) -> HttpResponse {
    ok(&encode_result_body(method_id, payload).unwrap())
}

/// 200 response whose body is the given envelope frames
pub fn frames_response<I, S>(chunks: I) -> HttpResponse
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ok(&write_frames(chunks.into_iter().map(Into::into)).unwrap())
}

pub fn csrf_of(request: &HttpRequest) -> Option<String> {
    decode_request_body(&request.body_text())
        .ok()
        .and_then(|decoded| decoded.csrf_token)
}

pub fn params_of(request: &HttpRequest) -> Tree {
    decode_request_body(&request.body_text()).unwrap().params
}

pub fn credentials(csrf: &str, session_id: &str) -> Credentials {
    Credentials {
        csrf_token: csrf.to_string(),
        session_id: session_id.to_string(),
        cookies: BTreeMap::from([("SID".to_string(), "sid-cookie".to_string())]),
    }
}

pub fn test_config() -> Config {
    Config {
        base_url: BASE_URL.to_string(),
        upload_url: format!("{BASE_URL}/upload/_/"),
        ..Config::default()
    }
}

/// Client whose session starts with `csrf-0`/`sid-0`
pub fn client_with(transport: MockTransport) -> (Arc<MockTransport>, RpcClient<MockTransport>) {
    let transport = Arc::new(transport);
    let session = SessionCoordinator::new(
        Arc::clone(&transport),
        format!("{BASE_URL}/"),
        credentials("csrf-0", "sid-0"),
    )
    .unwrap();
    let client = RpcClient::new(Arc::clone(&transport), Arc::new(session), &test_config());
    (transport, client)
}
