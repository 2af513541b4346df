//! batchexecute envelopes and request encoding.
//!
//! Outbound, one call is a form-encoded body whose `f.req` field wraps the
//! method ID and the JSON-encoded parameter tree:
//!
//! ```text
//! f.req=[[["wXbhsf","[null,1]",null,"generic"]]]&at=<csrf>&
//! ```
//!
//! Inbound, every frame may hold one envelope or a batch of them. Only
//! `wrb.fr` (result) and `er` (error) envelopes are recognised; everything
//! else (`di`, `af.httprm`, ...) is control traffic and skipped.

use std::fmt;

use serde_json::{Value, json};
use url::form_urlencoded;

use crate::error::{DecodeError, Result};
use crate::transport::{Frame, read_frames, strip_anti_xssi, write_frames};
use crate::tree::Tree;

/// First element of a call result envelope
pub const RESULT_MARKER: &str = "wrb.fr";

/// First element of a call error envelope
pub const ERROR_MARKER: &str = "er";

/// Fixed trailing marker of the outbound call envelope
pub const SEQUENCE_MARKER: &str = "generic";

/// Path of the single multiplexed RPC endpoint
pub const BATCHEXECUTE_PATH: &str = "/_/LabsTailwindUi/data/batchexecute";

/// Default `source-path` hint when a call is not scoped to a notebook
pub const DEFAULT_SOURCE_PATH: &str = "/";

const RESULT_STATUS_INDEX: usize = 5;
const RESULT_SEQUENCE_INDEX: usize = 6;

/// Opaque identifier selecting one remote operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodId(String);

impl MethodId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MethodId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MethodId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for MethodId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One outbound call, ready to be encoded with the current credentials
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: MethodId,
    pub params: Tree,
    pub source_path: String,
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: impl Into<MethodId>, params: Tree) -> Self {
        Self {
            method: method.into(),
            params,
            source_path: DEFAULT_SOURCE_PATH.to_string(),
        }
    }

    #[must_use]
    pub fn with_source_path(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = source_path.into();
        self
    }

    /// The `f.req` value before URL encoding.
    ///
    /// The parameter tree is serialized to a string exactly once, then that
    /// string is embedded as a JSON string in the outer envelope.
    #[must_use]
    pub fn f_req_json(&self) -> String {
        json!([[[
            self.method.as_str(),
            self.params.to_string(),
            Value::Null,
            SEQUENCE_MARKER
        ]]])
        .to_string()
    }

    /// Form-encoded request body carrying the call and the CSRF token.
    #[must_use]
    pub fn encode_body(&self, csrf_token: &str) -> String {
        let mut body = form_urlencoded::Serializer::new(String::new())
            .append_pair("f.req", &self.f_req_json())
            .append_pair("at", csrf_token)
            .finish();
        body.push('&');
        body
    }

    /// Query string carrying the method ID, path hint and session ID.
    #[must_use]
    pub fn encode_query(&self, session_id: &str) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("rpcids", self.method.as_str())
            .append_pair("source-path", &self.source_path)
            .append_pair("f.sid", session_id)
            .append_pair("rt", "c")
            .finish()
    }
}

/// What a request body carried, recovered by [`decode_request_body`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRequest {
    pub method_id: String,
    pub params: Tree,
    pub csrf_token: Option<String>,
}

/// Recover the method ID and parameter tree from an encoded request body.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidRequest`] when `f.req` is missing or does
/// not have the call envelope shape, and [`DecodeError::InvalidPayload`] when
/// the embedded parameters are not valid JSON.
pub fn decode_request_body(body: &str) -> Result<DecodedRequest> {
    let mut f_req = None;
    let mut csrf_token = None;
    for (key, value) in form_urlencoded::parse(body.as_bytes()) {
        match key.as_ref() {
            "f.req" => f_req = Some(value.into_owned()),
            "at" => csrf_token = Some(value.into_owned()),
            _ => {}
        }
    }

    let f_req = f_req.ok_or_else(|| DecodeError::InvalidRequest("missing f.req".to_string()))?;
    let outer: Value = serde_json::from_str(&f_req).map_err(DecodeError::InvalidFrameJson)?;

    let call = outer
        .get(0)
        .and_then(|batch| batch.get(0))
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::InvalidRequest("f.req is not a call envelope".to_string()))?;

    let method_id = call
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::InvalidRequest("missing method ID".to_string()))?
        .to_string();
    let raw_params = call
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::InvalidRequest("parameters are not a string".to_string()))?;

    let params = serde_json::from_str::<Value>(raw_params)
        .map(Tree::from)
        .map_err(|source| DecodeError::InvalidPayload {
            method_id: method_id.clone(),
            source,
        })?;

    Ok(DecodedRequest {
        method_id,
        params,
        csrf_token,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Result,
    Error,
}

/// A frame entry matching the call-response shape
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub method_id: String,
    /// `None` when the call succeeded without data
    pub payload: Option<Tree>,
    pub sequence_marker: Option<String>,
    /// Remote status code, present only on failed calls
    pub status: Option<i64>,
}

impl Envelope {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == EnvelopeKind::Error || (self.payload.is_none() && self.status.is_some())
    }
}

/// Decode an inner payload string into a tree.
///
/// A literal `null` means "succeeded, no data" and yields `Ok(None)`.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidPayload`] when `raw` is not valid JSON.
pub fn decode_payload(method_id: &str, raw: &str) -> Result<Option<Tree>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|source| DecodeError::InvalidPayload {
            method_id: method_id.to_string(),
            source,
        })?;

    Ok(match value {
        Value::Null => None,
        other => Some(Tree::from(other)),
    })
}

fn payload_from_value(method_id: &str, value: Option<&Value>) -> Result<Option<Tree>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => decode_payload(method_id, raw),
        Some(other) => {
            tracing::debug!(method_id, "Payload is already structured, not a string");
            Ok(Some(Tree::from(other.clone())))
        }
    }
}

fn status_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Array(items) => items.first().and_then(Value::as_i64),
        _ => None,
    }
}

fn parse_envelope(items: &[Value]) -> Result<Option<Envelope>> {
    let (Some(marker), Some(method_id)) = (
        items.first().and_then(Value::as_str),
        items.get(1).and_then(Value::as_str),
    ) else {
        return Ok(None);
    };

    let envelope = match marker {
        RESULT_MARKER => {
            let payload = payload_from_value(method_id, items.get(2))?;
            let status = if payload.is_none() {
                items.get(RESULT_STATUS_INDEX).and_then(status_code)
            } else {
                None
            };
            Envelope {
                kind: EnvelopeKind::Result,
                method_id: method_id.to_string(),
                payload,
                sequence_marker: items
                    .get(RESULT_SEQUENCE_INDEX)
                    .and_then(Value::as_str)
                    .map(str::to_string),
                status,
            }
        }
        ERROR_MARKER => Envelope {
            kind: EnvelopeKind::Error,
            method_id: method_id.to_string(),
            payload: None,
            sequence_marker: None,
            status: items.get(2).and_then(status_code),
        },
        _ => return Ok(None),
    };

    Ok(Some(envelope))
}

/// Extract every envelope from one frame chunk.
///
/// Frames that are not JSON arrays, or whose entries do not carry a known
/// marker, are control traffic and contribute nothing.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidPayload`] when a recognised envelope holds
/// an undecodable payload.
pub fn parse_envelopes(chunk: &str) -> Result<Vec<Envelope>> {
    let chunk = chunk.trim();
    if chunk.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = match serde_json::from_str(chunk) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, chars = chunk.chars().count(), "Skipping non-JSON frame");
            return Ok(Vec::new());
        }
    };
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };

    if items.first().is_some_and(Value::is_array) {
        let mut envelopes = Vec::new();
        for entry in items.iter().filter_map(Value::as_array) {
            if let Some(envelope) = parse_envelope(entry)? {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    } else {
        Ok(parse_envelope(&items)?.into_iter().collect())
    }
}

/// Ordered envelopes decoded from one response body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSet {
    envelopes: Vec<Envelope>,
}

impl ResponseSet {
    /// # Errors
    ///
    /// Propagates the first envelope parsing failure.
    pub fn from_frames(frames: &[Frame]) -> Result<Self> {
        let mut envelopes = Vec::new();
        for frame in frames {
            envelopes.extend(parse_envelopes(frame.chunk())?);
        }
        Ok(Self { envelopes })
    }

    #[must_use]
    pub fn envelopes(&self) -> &[Envelope] {
        &self.envelopes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    #[must_use]
    pub fn find(&self, method_id: &str) -> Option<&Envelope> {
        self.envelopes.iter().find(|e| e.method_id == method_id)
    }

    /// Method IDs in response order, without duplicates.
    #[must_use]
    pub fn method_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for envelope in &self.envelopes {
            if !ids.contains(&envelope.method_id.as_str()) {
                ids.push(&envelope.method_id);
            }
        }
        ids
    }

    /// True if an envelope for `method_id` carries data.
    #[must_use]
    pub fn has_data_for(&self, method_id: &str) -> bool {
        self.find(method_id).is_some_and(|e| e.payload.is_some())
    }

    /// Payload for `method_id`: `Some` with data, `None` for a null result.
    ///
    /// # Errors
    ///
    /// [`DecodeError::MethodNotFoundInResponse`] when no envelope matches and
    /// [`DecodeError::RemoteStatus`] when the matching envelope is an error.
    pub fn result_for(&self, method_id: &str) -> Result<Option<Tree>> {
        let Some(envelope) = self.find(method_id) else {
            return Err(DecodeError::MethodNotFoundInResponse {
                method_id: method_id.to_string(),
                found: self.method_ids().into_iter().map(str::to_string).collect(),
            });
        };

        if envelope.is_error() {
            return Err(DecodeError::RemoteStatus {
                method_id: method_id.to_string(),
                code: envelope.status,
            });
        }

        Ok(envelope.payload.clone())
    }

    /// Like [`result_for`](Self::result_for) but moves the payload out.
    ///
    /// # Errors
    ///
    /// Same as [`result_for`](Self::result_for).
    pub fn into_result(mut self, method_id: &str) -> Result<Option<Tree>> {
        let index = self.envelopes.iter().position(|e| e.method_id == method_id);
        match index {
            Some(i) if !self.envelopes[i].is_error() => Ok(self.envelopes.swap_remove(i).payload),
            _ => self.result_for(method_id),
        }
    }
}

/// Strip the prefix, read frames and parse envelopes.
///
/// # Errors
///
/// Any framing, JSON or payload failure.
pub fn decode_response(body: &str) -> Result<ResponseSet> {
    let frames = read_frames(strip_anti_xssi(body))?;
    let set = ResponseSet::from_frames(&frames)?;
    tracing::trace!(
        frames = frames.len(),
        envelopes = set.envelopes.len(),
        "Decoded response"
    );
    Ok(set)
}

/// Frame chunk holding one result envelope, shaped like the service's.
#[must_use]
pub fn result_envelope_json(method_id: &str, payload: Option<&Tree>) -> String {
    let payload = payload.map_or(Value::Null, |tree| Value::String(tree.to_string()));
    json!([[
        RESULT_MARKER,
        method_id,
        payload,
        Value::Null,
        Value::Null,
        Value::Null,
        SEQUENCE_MARKER
    ]])
    .to_string()
}

/// Frame chunk holding one error envelope.
#[must_use]
pub fn error_envelope_json(method_id: &str, code: i64) -> String {
    json!([[ERROR_MARKER, method_id, code]]).to_string()
}

/// Complete response body for a single result, as the service would send it.
///
/// # Errors
///
/// Only fails for payloads beyond the frame size limit.
pub fn encode_result_body(method_id: &str, payload: Option<&Tree>) -> Result<String> {
    write_frames([
        result_envelope_json(method_id, payload),
        r#"[["di",42],["af.httprm",41,"-1",7]]"#.to_string(),
    ])
}
