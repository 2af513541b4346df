//! Wire codec for the NotebookLM batchexecute RPC channel.
//!
//! This crate is pure: it turns parameter trees into request bodies and
//! response bodies back into payload trees, and never touches the network.
//!
//! # Architecture
//!
//! - [`tree`]: Positional payload tree shared by requests and responses
//! - [`transport`]: Anti-XSSI prefix handling and the length-prefixed frame codec
//! - [`protocol`]: Envelope parsing, payload decoding and request encoding
//! - [`error`]: Decode and shape error types
//!
//! # Example
//!
//! ```
//! use nlm_rpc::{RpcRequest, decode_response, tree};
//!
//! let request = RpcRequest::new("wXbhsf", tree![]);
//! let body = request.encode_body("csrf-token");
//! assert!(body.starts_with("f.req="));
//!
//! let response = ")]}'\n\n53\n[\"wrb.fr\",\"wXbhsf\",\"[[\\\"nb1\\\",\\\"Title\\\"]]\",null,null]\n";
//! let set = decode_response(response).unwrap();
//! assert_eq!(set.result_for("wXbhsf").unwrap(), Some(tree![tree!["nb1", "Title"]]));
//! ```

pub mod error;
pub mod protocol;
pub mod transport;
pub mod tree;

pub use error::{DecodeError, Result, ShapeError};

pub use protocol::{
    BATCHEXECUTE_PATH, DEFAULT_SOURCE_PATH, DecodedRequest, ERROR_MARKER, Envelope, EnvelopeKind,
    MethodId, RESULT_MARKER, ResponseSet, RpcRequest, SEQUENCE_MARKER, decode_payload,
    decode_request_body, decode_response, encode_result_body, error_envelope_json,
    parse_envelopes, result_envelope_json,
};

pub use transport::{
    ANTI_XSSI_PREFIX, Frame, FrameCodec, MAX_FRAME_CHARS, read_frames, strip_anti_xssi,
    write_frames,
};

pub use tree::Tree;
