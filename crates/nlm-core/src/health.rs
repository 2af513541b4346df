//! Method ID health check.
//!
//! Each catalog method is called with harmless parameters and the response is
//! searched for the method's ID. A missing ID means the service renamed the
//! method (`Mismatch`); transport or HTTP failures are reported as `Error`
//! since they are often transient.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nlm_rpc::{RpcRequest, Tree, tree};
use tracing::{debug, info, warn};

use crate::client::RpcClient;
use crate::http::HttpTransport;
use crate::methods::RpcMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckStatus {
    Ok,
    Mismatch,
    Error,
    Skipped,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Mismatch => "MISMATCH",
            CheckStatus::Error => "ERROR",
            CheckStatus::Skipped => "SKIPPED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub method: RpcMethod,
    pub status: CheckStatus,
    pub expected_id: &'static str,
    pub found_ids: Vec<String>,
    pub error: Option<String>,
}

impl CheckResult {
    fn skipped(method: RpcMethod, reason: &str) -> Self {
        Self {
            method,
            status: CheckStatus::Skipped,
            expected_id: method.id(),
            found_ids: Vec::new(),
            error: Some(reason.to_string()),
        }
    }
}

/// Methods that create or delete resources. They only run with `full`, against
/// a temporary notebook that is deleted afterwards.
pub const FULL_MODE_METHODS: [RpcMethod; 3] = [
    RpcMethod::CreateNotebook,
    RpcMethod::AddSource,
    RpcMethod::DeleteNotebook,
];

/// Why `method` is not called by a read-only run, if it is not.
#[must_use]
pub fn skip_reason(method: RpcMethod) -> Option<&'static str> {
    match method {
        RpcMethod::CreateAudio | RpcMethod::CreateVideo | RpcMethod::CreateArtifact => {
            Some("Method always skipped (slow and uses quota)")
        }
        RpcMethod::AddSourceFile => Some("Method always skipped (requires file upload)"),
        RpcMethod::CreateNotebook | RpcMethod::AddSource | RpcMethod::DeleteNotebook => {
            Some("Requires full mode (creates or deletes resources)")
        }
        _ => None,
    }
}

/// Read-only test parameters, or `None` when the method needs a notebook
/// and none was given.
#[must_use]
pub fn default_params(method: RpcMethod, notebook_id: Option<&str>) -> Option<Tree> {
    if method == RpcMethod::ListNotebooks {
        return Some(tree![]);
    }

    let notebook_id = notebook_id?;
    match method {
        RpcMethod::GetNotebook => Some(tree![notebook_id]),
        RpcMethod::ListArtifacts => Some(tree![tree![notebook_id]]),
        RpcMethod::PollResearch => Some(tree![tree![notebook_id], "placeholder_task_id"]),
        RpcMethod::Summarize => Some(tree![tree![notebook_id], tree![], "Summarize the content"]),
        _ => None,
    }
}

/// Call `method` and check its ID appears in the response.
pub async fn check_method<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    method: RpcMethod,
    params: Tree,
) -> CheckResult {
    check_method_with_payload(client, method, params).await.0
}

/// [`check_method`], also returning the method's payload when it succeeded.
async fn check_method_with_payload<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    method: RpcMethod,
    params: Tree,
) -> (CheckResult, Option<Tree>) {
    let expected_id = method.id();
    let request = RpcRequest::new(method, params);

    match client.call_raw(&request).await {
        Ok(set) => {
            let found_ids: Vec<String> = set.method_ids().into_iter().map(str::to_string).collect();
            let found = found_ids.iter().any(|id| id == expected_id);
            let payload = set.result_for(expected_id).ok().flatten();
            let result = CheckResult {
                method,
                status: if found {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Mismatch
                },
                expected_id,
                error: (!found).then(|| format!("Expected '{expected_id}' not in response")),
                found_ids,
            };
            (result, payload)
        }
        Err(e) => {
            let result = CheckResult {
                method,
                status: CheckStatus::Error,
                expected_id,
                found_ids: Vec::new(),
                error: Some(e.to_string()),
            };
            (result, None)
        }
    }
}

/// ID at `path` in a payload, as a string or an integer.
#[must_use]
pub fn extract_id(payload: &Tree, path: &[usize]) -> Option<String> {
    let node = payload.at(path)?;
    node.as_str()
        .map(str::to_string)
        .or_else(|| node.as_i64().map(|n| n.to_string()))
}

/// Sleeps between consecutive calls, never before the first.
struct Pacer {
    delay: Duration,
    called: bool,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            called: false,
        }
    }

    async fn before_call(&mut self) {
        if self.called && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.called = true;
    }
}

fn log_result(result: &CheckResult) {
    let method = result.method;
    match result.status {
        CheckStatus::Ok => debug!(%method, "OK"),
        CheckStatus::Skipped => debug!(%method, reason = ?result.error, "Skipped"),
        CheckStatus::Mismatch => warn!(%method, found = ?result.found_ids, "Method ID mismatch"),
        CheckStatus::Error => warn!(%method, error = ?result.error, "Check failed"),
    }
}

/// Create the temporary notebook and add a text source to it. Returns the
/// notebook ID when creation succeeded.
async fn setup_temp_notebook<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    pacer: &mut Pacer,
    results: &mut Vec<CheckResult>,
) -> Option<String> {
    let title = format!("nlm-health-check-{}", Utc::now().format("%Y%m%d-%H%M%S"));
    pacer.before_call().await;
    let (created, payload) =
        check_method_with_payload(client, RpcMethod::CreateNotebook, tree![title]).await;
    log_result(&created);
    results.push(created);

    let Some(notebook_id) = payload.as_ref().and_then(|p| extract_id(p, &[0])) else {
        warn!("Temporary notebook was not created");
        results.push(CheckResult::skipped(RpcMethod::AddSource, "No temporary notebook"));
        return None;
    };
    info!(notebook_id = %notebook_id, "Created temporary notebook");

    let source = tree![
        tree![tree![
            Tree::Null,
            tree!["Test Source", "Test content for RPC health check."],
            Tree::Null,
            Tree::Null,
            Tree::Null,
            Tree::Null,
            Tree::Null,
            Tree::Null
        ]],
        notebook_id.as_str(),
        tree![2],
        Tree::Null,
        Tree::Null
    ];
    pacer.before_call().await;
    let added = check_method(client, RpcMethod::AddSource, source).await;
    log_result(&added);
    results.push(added);

    Some(notebook_id)
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<CheckResult>,
}

impl HealthReport {
    #[must_use]
    pub fn counts(&self) -> BTreeMap<CheckStatus, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Only mismatches fail the check; errors may be transient.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.count(CheckStatus::Mismatch) == 0
    }
}

/// Check every catalog method in order, pausing `delay` between calls that
/// reach the service.
///
/// With `full`, a temporary notebook is created first and used for the
/// notebook-scoped methods in place of `notebook_id`. It is deleted at the end
/// whatever the other checks returned.
pub async fn run_health_check<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: Option<&str>,
    delay: Duration,
    full: bool,
) -> HealthReport {
    let started_at = Utc::now();
    let mut pacer = Pacer::new(delay);
    let mut results = Vec::with_capacity(RpcMethod::ALL.len());

    let temp_notebook = if full {
        setup_temp_notebook(client, &mut pacer, &mut results).await
    } else {
        None
    };
    let notebook_id = temp_notebook.as_deref().or(notebook_id);

    for method in RpcMethod::ALL {
        // Setup and cleanup record these
        if full && FULL_MODE_METHODS.contains(&method) {
            continue;
        }

        let result = if let Some(reason) = skip_reason(method) {
            CheckResult::skipped(method, reason)
        } else if let Some(params) = default_params(method, notebook_id) {
            pacer.before_call().await;
            check_method(client, method, params).await
        } else {
            CheckResult::skipped(method, "No test parameters available")
        };
        log_result(&result);
        results.push(result);
    }

    if full {
        let deleted = match &temp_notebook {
            Some(id) => {
                pacer.before_call().await;
                check_method(client, RpcMethod::DeleteNotebook, tree![id.as_str()]).await
            }
            None => CheckResult::skipped(RpcMethod::DeleteNotebook, "No temporary notebook"),
        };
        if let Some(id) = &temp_notebook
            && deleted.status != CheckStatus::Ok
        {
            warn!(notebook_id = %id, "Temporary notebook may need manual deletion");
        }
        log_result(&deleted);
        results.push(deleted);
    }

    let report = HealthReport {
        started_at,
        finished_at: Utc::now(),
        results,
    };
    info!(
        ok = report.count(CheckStatus::Ok),
        mismatch = report.count(CheckStatus::Mismatch),
        error = report.count(CheckStatus::Error),
        skipped = report.count(CheckStatus::Skipped),
        "Health check finished"
    );
    report
}
