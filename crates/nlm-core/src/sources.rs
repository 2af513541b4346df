//! Source readiness polling.
//!
//! Sources are read from the notebook payload (`GET_NOTEBOOK`), where each
//! entry is positional:
//!
//! | position   | meaning                               |
//! |------------|---------------------------------------|
//! | `[0]`      | `[id]` or `id`                        |
//! | `[1]`      | title                                 |
//! | `[2][2][0]`| created timestamp (unix seconds)      |
//! | `[2][4]`   | source kind code                      |
//! | `[2][7][0]`| web page URL                          |
//! | `[3][1]`   | status code                           |

use std::fmt;

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use nlm_rpc::{ShapeError, Tree, tree};
use tracing::{debug, info};

use crate::client::RpcClient;
use crate::http::HttpTransport;
use crate::methods::RpcMethod;
use crate::poll::{PollConfig, PollError, PollState, poll_until};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Processing,
    Ready,
    Error,
    Preparing,
}

impl SourceStatus {
    /// Unknown codes are treated as ready.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SourceStatus::Processing,
            3 => SourceStatus::Error,
            5 => SourceStatus::Preparing,
            _ => SourceStatus::Ready,
        }
    }

    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            SourceStatus::Processing => 1,
            SourceStatus::Ready => 2,
            SourceStatus::Error => 3,
            SourceStatus::Preparing => 5,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Processing => "processing",
            SourceStatus::Ready => "ready",
            SourceStatus::Error => "error",
            SourceStatus::Preparing => "preparing",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub kind_code: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub status: SourceStatus,
}

impl SourceInfo {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == SourceStatus::Ready
    }
}

/// `GET_NOTEBOOK` parameters
#[must_use]
pub fn notebook_params(notebook_id: &str) -> Tree {
    tree![notebook_id, Tree::Null, tree![2], Tree::Null, 0]
}

#[must_use]
pub fn notebook_path(notebook_id: &str) -> String {
    format!("/notebook/{notebook_id}")
}

/// Map one positional source entry.
///
/// # Errors
///
/// Returns [`ShapeError`] if the entry is empty or has no string ID.
pub fn parse_source_entry(entry: &Tree) -> std::result::Result<SourceInfo, ShapeError> {
    let items = entry.expect_len(1, "source entry")?;

    let id_node = match &items[0] {
        Tree::Seq(inner) => inner.first().unwrap_or(&Tree::Null),
        other => other,
    };
    let id = id_node.as_str().ok_or(ShapeError::NotASequence {
        what: "source id",
        found: id_node.kind(),
    })?;

    let meta = entry.get(2);
    let created_at = meta
        .and_then(|m| m.at(&[2, 0]))
        .and_then(Tree::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    let status = entry
        .at(&[3, 1])
        .and_then(Tree::as_i64)
        .map_or(SourceStatus::Ready, SourceStatus::from_code);

    Ok(SourceInfo {
        id: id.to_string(),
        title: entry.get(1).and_then(Tree::as_str).map(str::to_string),
        url: meta
            .and_then(|m| m.at(&[7, 0]))
            .and_then(Tree::as_str)
            .map(str::to_string),
        kind_code: meta.and_then(|m| m.get(4)).and_then(Tree::as_i64),
        created_at,
        status,
    })
}

/// Sources from a `GET_NOTEBOOK` payload; malformed entries are skipped.
#[must_use]
pub fn parse_sources(notebook: Option<&Tree>) -> Vec<SourceInfo> {
    let Some(entries) = notebook.and_then(|nb| nb.at(&[0, 1])).and_then(Tree::as_seq) else {
        debug!("Notebook payload has no source list");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match parse_source_entry(entry) {
            Ok(source) => Some(source),
            Err(e) => {
                debug!("Skipping source entry: {e}");
                None
            }
        })
        .collect()
}

/// # Errors
///
/// Any call error.
pub async fn list_sources<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
) -> Result<Vec<SourceInfo>> {
    let notebook = client
        .call(
            RpcMethod::GetNotebook,
            notebook_params(notebook_id),
            Some(&notebook_path(notebook_id)),
        )
        .await?;
    Ok(parse_sources(notebook.as_ref()))
}

/// # Errors
///
/// Any call error.
pub async fn get_source<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
    source_id: &str,
) -> Result<Option<SourceInfo>> {
    let sources = list_sources(client, notebook_id).await?;
    Ok(sources.into_iter().find(|s| s.id == source_id))
}

/// Wait until a source is ready.
///
/// # Errors
///
/// [`Error::SourceFailed`] if processing fails, [`Error::SourceNotFound`] if
/// the source disappears, [`Error::Timeout`] with the last status otherwise.
pub async fn wait_until_ready<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
    source_id: &str,
    config: &PollConfig,
) -> Result<SourceInfo> {
    let outcome = poll_until(config, || async {
        let source = get_source(client, notebook_id, source_id)
            .await?
            .ok_or_else(|| Error::SourceNotFound {
                source_id: source_id.to_string(),
            })?;

        Ok::<_, Error>(match source.status {
            SourceStatus::Ready => PollState::Success(source),
            SourceStatus::Error => PollState::Failure(source),
            SourceStatus::Processing | SourceStatus::Preparing => PollState::Pending(source.status),
        })
    })
    .await;

    match outcome {
        Ok(source) => {
            info!(source_id, "Source ready");
            Ok(source)
        }
        Err(PollError::Failed(source)) => Err(Error::SourceFailed {
            source_id: source.id,
        }),
        Err(PollError::Timeout { elapsed, last }) => Err(Error::Timeout {
            elapsed,
            last: last.map(|status| status.to_string()),
        }),
        Err(PollError::Check(e)) => Err(e),
    }
}

/// Wait for several sources concurrently; results keep the input order.
///
/// # Errors
///
/// The first failure among the waits.
pub async fn wait_for_sources<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
    source_ids: &[String],
    config: &PollConfig,
) -> Result<Vec<SourceInfo>> {
    try_join_all(
        source_ids
            .iter()
            .map(|id| wait_until_ready(client, notebook_id, id, config)),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_codes() {
        assert_eq!(SourceStatus::from_code(1), SourceStatus::Processing);
        assert_eq!(SourceStatus::from_code(2), SourceStatus::Ready);
        assert_eq!(SourceStatus::from_code(3), SourceStatus::Error);
        assert_eq!(SourceStatus::from_code(5), SourceStatus::Preparing);
        assert_eq!(SourceStatus::from_code(42), SourceStatus::Ready);
        assert_eq!(SourceStatus::Preparing.code(), 5);
    }

    #[test]
    fn test_notebook_params() {
        assert_eq!(notebook_params("nb_1").to_string(), r#"["nb_1",null,[2],null,0]"#);
    }

    #[test]
    fn test_parse_full_entry() {
        let entry = Tree::from(json!([
            ["src_1"],
            "Paper.pdf",
            [null, null, [1_704_067_200, 0], null, 3, null, null, ["https://example.com/p.pdf"]],
            [null, 1]
        ]));
        let source = parse_source_entry(&entry).unwrap();
        assert_eq!(source.id, "src_1");
        assert_eq!(source.title.as_deref(), Some("Paper.pdf"));
        assert_eq!(source.url.as_deref(), Some("https://example.com/p.pdf"));
        assert_eq!(source.kind_code, Some(3));
        assert_eq!(source.created_at.map(|t| t.timestamp()), Some(1_704_067_200));
        assert_eq!(source.status, SourceStatus::Processing);
    }

    #[test]
    fn test_parse_short_entry_defaults() {
        let source = parse_source_entry(&Tree::from(json!(["src_2"]))).unwrap();
        assert_eq!(source.id, "src_2");
        assert_eq!(source.title, None);
        assert_eq!(source.status, SourceStatus::Ready);
    }

    #[test]
    fn test_parse_bad_entries() {
        assert!(parse_source_entry(&Tree::from(json!([]))).is_err());
        assert!(parse_source_entry(&Tree::from(json!([[1]]))).is_err());
        assert!(parse_source_entry(&Tree::from(json!("src"))).is_err());
    }

    #[test]
    fn test_parse_sources_from_notebook() {
        let notebook = Tree::from(json!([[
            "Notebook",
            [[["a"], "A", null, [null, 2]], [], [["b"], "B", null, [null, 3]]],
            "nb_1"
        ]]));
        let sources = parse_sources(Some(&notebook));
        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(sources[1].status, SourceStatus::Error);
    }

    #[test]
    fn test_parse_sources_missing_list() {
        assert!(parse_sources(None).is_empty());
        assert!(parse_sources(Some(&Tree::from(json!([["Notebook"]])))).is_empty());
    }
}
