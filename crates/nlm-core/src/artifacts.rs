//! Generation status polling.
//!
//! There is no poll-by-ID call: the artifact list is fetched and the task is
//! looked up by ID. A task not yet in the list is still pending.

use std::fmt;

use nlm_rpc::{Tree, tree};
use tracing::{debug, info};

use crate::client::RpcClient;
use crate::http::HttpTransport;
use crate::methods::RpcMethod;
use crate::poll::{PollConfig, PollError, PollState, poll_until};
use crate::sources::notebook_path;
use crate::{Error, Result};

const SUGGESTED_FILTER: &str = "NOT artifact.status = \"ARTIFACT_STATUS_SUGGESTED\"";

/// Artifact type codes
pub mod kind {
    pub const AUDIO: i64 = 1;
    pub const REPORT: i64 = 2;
    pub const VIDEO: i64 = 3;
    pub const INFOGRAPHIC: i64 = 7;
    pub const SLIDE_DECK: i64 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl GenerationState {
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => GenerationState::InProgress,
            3 => GenerationState::Completed,
            4 => GenerationState::Failed,
            _ => GenerationState::Pending,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationState::Pending => "pending",
            GenerationState::InProgress => "in_progress",
            GenerationState::Completed => "completed",
            GenerationState::Failed => "failed",
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationStatus {
    pub task_id: String,
    pub kind_code: Option<i64>,
    pub state: GenerationState,
}

impl GenerationStatus {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == GenerationState::Completed
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == GenerationState::Failed
    }
}

/// `LIST_ARTIFACTS` parameters
#[must_use]
pub fn list_params(notebook_id: &str) -> Tree {
    tree![tree![2], notebook_id, SUGGESTED_FILTER]
}

/// Artifact rows from a `LIST_ARTIFACTS` payload.
///
/// The rows are usually wrapped in one extra sequence.
#[must_use]
pub fn artifact_rows(payload: Option<&Tree>) -> &[Tree] {
    let Some(rows) = payload.and_then(Tree::as_seq) else {
        return &[];
    };
    match rows.first() {
        Some(Tree::Seq(inner)) => inner,
        Some(_) => rows,
        None => &[],
    }
}

fn is_media_url(node: Option<&Tree>) -> bool {
    node.and_then(Tree::as_str)
        .is_some_and(|url| url.starts_with("http://") || url.starts_with("https://"))
}

fn infographic_url(row: &[Tree]) -> Option<&str> {
    row.iter()
        .rev()
        .map(|item| item.at(&[2, 0, 1, 0]))
        .find(|url| is_media_url(*url))
        .flatten()
        .and_then(Tree::as_str)
}

/// Completed media artifacts only count once their URLs are populated.
#[must_use]
pub fn is_media_ready(row: &Tree, kind_code: i64) -> bool {
    match kind_code {
        kind::AUDIO => is_media_url(row.at(&[6, 5, 0, 0])),
        kind::VIDEO => row
            .get(8)
            .and_then(Tree::as_seq)
            .is_some_and(|items| items.iter().any(|item| is_media_url(item.get(0)))),
        kind::INFOGRAPHIC => row.as_seq().and_then(infographic_url).is_some(),
        kind::SLIDE_DECK => is_media_url(row.at(&[16, 3])),
        _ => true,
    }
}

/// Status of `task_id` within the artifact rows.
#[must_use]
pub fn status_from_rows(rows: &[Tree], task_id: &str) -> GenerationStatus {
    let Some(row) = rows
        .iter()
        .find(|row| row.get(0).and_then(Tree::as_str) == Some(task_id))
    else {
        return GenerationStatus {
            task_id: task_id.to_string(),
            kind_code: None,
            state: GenerationState::Pending,
        };
    };

    let kind_code = row.get(2).and_then(Tree::as_i64).unwrap_or(0);
    let mut state = GenerationState::from_code(row.get(4).and_then(Tree::as_i64).unwrap_or(0));

    if state == GenerationState::Completed && !is_media_ready(row, kind_code) {
        debug!(task_id, kind_code, "Artifact completed but media not ready, continuing poll");
        state = GenerationState::InProgress;
    }

    GenerationStatus {
        task_id: task_id.to_string(),
        kind_code: Some(kind_code),
        state,
    }
}

/// # Errors
///
/// Any call error.
pub async fn poll_status<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
    task_id: &str,
) -> Result<GenerationStatus> {
    let payload = client
        .call(
            RpcMethod::ListArtifacts,
            list_params(notebook_id),
            Some(&notebook_path(notebook_id)),
        )
        .await?;
    Ok(status_from_rows(artifact_rows(payload.as_ref()), task_id))
}

/// Wait for a generation task to complete.
///
/// # Errors
///
/// [`Error::GenerationFailed`] if the task fails, [`Error::Timeout`] with the
/// last state if it does not finish in time.
pub async fn wait_for_completion<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
    task_id: &str,
    config: &PollConfig,
) -> Result<GenerationStatus> {
    let outcome = poll_until(config, || async {
        let status = poll_status(client, notebook_id, task_id).await?;
        Ok::<_, Error>(match status.state {
            GenerationState::Completed => PollState::Success(status),
            GenerationState::Failed => PollState::Failure(status),
            GenerationState::Pending | GenerationState::InProgress => PollState::Pending(status.state),
        })
    })
    .await;

    match outcome {
        Ok(status) => {
            info!(task_id, "Generation complete");
            Ok(status)
        }
        Err(PollError::Failed(status)) => Err(Error::GenerationFailed {
            task_id: status.task_id,
        }),
        Err(PollError::Timeout { elapsed, last }) => Err(Error::Timeout {
            elapsed,
            last: last.map(|state| state.to_string()),
        }),
        Err(PollError::Check(e)) => Err(e),
    }
}
