//! Research session polling.
//!
//! The poll payload is `[[[task_id, info], ...]]`; only the first task is
//! reported. Within `info`, the query sits at `[1][0]`, the sources and the
//! summary at `[3][0]` and `[3][1]`, and the status code at `[4]`.

use std::fmt;

use nlm_rpc::{Tree, tree};
use tracing::{debug, info};

use crate::client::RpcClient;
use crate::http::HttpTransport;
use crate::methods::RpcMethod;
use crate::poll::{PollConfig, PollError, PollState, poll_until};
use crate::{Error, Result};

const STATUS_COMPLETED: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchStatus {
    NoResearch,
    InProgress,
    Completed,
}

impl ResearchStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResearchStatus::NoResearch => "no_research",
            ResearchStatus::InProgress => "in_progress",
            ResearchStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source found by research.
///
/// Fast research yields `[url, title, description, type]`; deep research
/// leaves the URL and description null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchSource {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub kind_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchResult {
    pub status: ResearchStatus,
    pub task_id: Option<String>,
    pub query: Option<String>,
    pub sources: Vec<ResearchSource>,
    pub summary: Option<String>,
}

impl ResearchResult {
    fn none() -> Self {
        Self {
            status: ResearchStatus::NoResearch,
            task_id: None,
            query: None,
            sources: Vec::new(),
            summary: None,
        }
    }
}

/// `POLL_RESEARCH` parameters
#[must_use]
pub fn poll_params(notebook_id: &str) -> Tree {
    tree![Tree::Null, Tree::Null, notebook_id]
}

fn parse_source(entry: &Tree) -> Option<ResearchSource> {
    let title = entry.get(1).and_then(Tree::as_str)?;
    Some(ResearchSource {
        url: entry
            .get(0)
            .and_then(Tree::as_str)
            .unwrap_or_default()
            .to_string(),
        title: title.to_string(),
        description: entry.get(2).and_then(Tree::as_str).map(str::to_string),
        kind_code: entry.get(3).and_then(Tree::as_i64),
    })
}

fn parse_task(task: &Tree) -> Option<ResearchResult> {
    let task_id = task.get(0).and_then(Tree::as_str)?;
    let info = task.get(1).filter(|info| info.as_seq().is_some())?;

    let status = match info.get(4).and_then(Tree::as_i64) {
        Some(STATUS_COMPLETED) => ResearchStatus::Completed,
        _ => ResearchStatus::InProgress,
    };

    Some(ResearchResult {
        status,
        task_id: Some(task_id.to_string()),
        query: info.at(&[1, 0]).and_then(Tree::as_str).map(str::to_string),
        sources: info
            .at(&[3, 0])
            .and_then(Tree::as_seq)
            .unwrap_or_default()
            .iter()
            .filter_map(parse_source)
            .collect(),
        summary: info
            .at(&[3, 1])
            .and_then(Tree::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

/// Research state from a `POLL_RESEARCH` payload.
#[must_use]
pub fn parse_research(payload: Option<&Tree>) -> ResearchResult {
    let tasks = payload
        .and_then(|p| p.get(0))
        .and_then(Tree::as_seq)
        .unwrap_or_default();

    tasks.iter().find_map(parse_task).unwrap_or_else(|| {
        debug!("No research task in payload");
        ResearchResult::none()
    })
}

/// # Errors
///
/// Any call error.
pub async fn poll_research<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
) -> Result<ResearchResult> {
    let payload = client
        .call(RpcMethod::PollResearch, poll_params(notebook_id), None)
        .await?;
    Ok(parse_research(payload.as_ref()))
}

/// Wait for the notebook's research session to complete.
///
/// # Errors
///
/// [`Error::NoResearch`] if the notebook has no research session,
/// [`Error::Timeout`] if it does not complete in time.
pub async fn wait_for_research<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
    config: &PollConfig,
) -> Result<ResearchResult> {
    let outcome = poll_until(config, || async {
        let result = poll_research(client, notebook_id).await?;
        Ok::<_, Error>(match result.status {
            ResearchStatus::Completed => PollState::Success(result),
            ResearchStatus::NoResearch => PollState::Failure(result),
            ResearchStatus::InProgress => PollState::Pending(result.status),
        })
    })
    .await;

    match outcome {
        Ok(result) => {
            info!(notebook_id, sources = result.sources.len(), "Research complete");
            Ok(result)
        }
        Err(PollError::Failed(_)) => Err(Error::NoResearch {
            notebook_id: notebook_id.to_string(),
        }),
        Err(PollError::Timeout { elapsed, last }) => Err(Error::Timeout {
            elapsed,
            last: last.map(|status| status.to_string()),
        }),
        Err(PollError::Check(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_payload_is_no_research() {
        assert_eq!(parse_research(None).status, ResearchStatus::NoResearch);
        let empty = Tree::from(json!([]));
        assert_eq!(parse_research(Some(&empty)).status, ResearchStatus::NoResearch);
    }

    #[test]
    fn test_in_progress_with_query() {
        let payload = Tree::from(json!([[["task_123", [null, ["research query", 1], 1, [[], ""], 1]]]]));
        let result = parse_research(Some(&payload));
        assert_eq!(result.status, ResearchStatus::InProgress);
        assert_eq!(result.task_id.as_deref(), Some("task_123"));
        assert_eq!(result.query.as_deref(), Some("research query"));
        assert!(result.sources.is_empty());
        assert_eq!(result.summary, None);
    }

    #[test]
    fn test_completed_fast_sources() {
        let payload = Tree::from(json!([[[
            "task_123",
            [
                null,
                ["AI research query", 1],
                1,
                [[
                    ["http://example.com/a1", "First Article", "Description 1", 1],
                    ["http://example.com/a2", "Second Article", "Description 2", 1]
                ], "Summary of findings"],
                2
            ]
        ]]]));
        let result = parse_research(Some(&payload));
        assert_eq!(result.status, ResearchStatus::Completed);
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[0].url, "http://example.com/a1");
        assert_eq!(result.sources[1].description.as_deref(), Some("Description 2"));
        assert_eq!(result.summary.as_deref(), Some("Summary of findings"));
    }

    #[test]
    fn test_deep_sources_have_empty_url() {
        let payload = Tree::from(json!([[[
            "task_123",
            [null, ["deep query", 1], 1, [[[null, "Deep Research Finding", null, 2]], "Deep summary"], 2]
        ]]]));
        let result = parse_research(Some(&payload));
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].title, "Deep Research Finding");
        assert_eq!(result.sources[0].url, "");
        assert_eq!(result.sources[0].kind_code, Some(2));
    }

    #[test]
    fn test_poll_params() {
        assert_eq!(poll_params("nb").to_string(), r#"[null,null,"nb"]"#);
    }
}
