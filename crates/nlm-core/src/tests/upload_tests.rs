//! Tests for the resumable upload handshake

use std::io::Write;

use tempfile::{NamedTempFile, TempDir};

use super::fixtures::{BASE_URL, MockTransport, client_with, ok, params_of, response_with, result_response};
use crate::Error;
use crate::upload::{register_file_source, upload_file};
use crate::{Tree, tree};

const SESSION_URL: &str = "https://notebooklm.test/upload/_/?upload_id=xyz";

fn upload_base() -> String {
    format!("{BASE_URL}/upload/_/")
}

fn start_response() -> crate::http::HttpResponse {
    let mut response = ok("");
    response.headers.push(("X-Goog-Upload-URL".to_string(), SESSION_URL.to_string()));
    response
}

#[tokio::test]
async fn test_upload_file_runs_three_steps() {
    let (transport, client) = client_with(MockTransport::new());
    transport.push(result_response("o4cbdc", Some(&tree![tree![tree![tree!["src_new"]]]])));
    transport.push(start_response());
    transport.push(ok(""));

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"hello notebook").unwrap();

    let source_id = upload_file(&client, &upload_base(), "nb_1", file.path()).await.unwrap();
    assert_eq!(source_id, "src_new");

    let posts = transport.posts();
    assert_eq!(posts.len(), 3);

    let filename = file.path().file_name().unwrap().to_str().unwrap();
    let params = params_of(&posts[0]);
    assert_eq!(params.at(&[0, 0, 0]).and_then(Tree::as_str), Some(filename));
    assert_eq!(params.get(1).and_then(Tree::as_str), Some("nb_1"));

    let start = &posts[1];
    assert_eq!(start.url, "https://notebooklm.test/upload/_/?authuser=0");
    assert_eq!(start.header("x-goog-upload-command"), Some("start"));
    assert_eq!(start.header("x-goog-upload-protocol"), Some("resumable"));
    assert_eq!(start.header("x-goog-upload-header-content-length"), Some("14"));
    let body: serde_json::Value = serde_json::from_slice(&start.body).unwrap();
    assert_eq!(body["PROJECT_ID"], "nb_1");
    assert_eq!(body["SOURCE_NAME"], filename);
    assert_eq!(body["SOURCE_ID"], "src_new");

    let upload = &posts[2];
    assert_eq!(upload.url, SESSION_URL);
    assert_eq!(upload.header("x-goog-upload-command"), Some("upload, finalize"));
    assert_eq!(upload.header("x-goog-upload-offset"), Some("0"));
    assert_eq!(upload.body, b"hello notebook");
}

#[tokio::test]
async fn test_missing_upload_url_header() {
    let (transport, client) = client_with(MockTransport::new());
    transport.push(result_response("o4cbdc", Some(&tree![tree!["src_new"]])));
    transport.push(ok(""));

    let file = NamedTempFile::new().unwrap();
    let err = upload_file(&client, &upload_base(), "nb_1", file.path()).await.unwrap_err();
    assert!(matches!(err, Error::Upload(ref msg) if msg.contains("x-goog-upload-url")));
    assert_eq!(transport.posts().len(), 2);
}

#[tokio::test]
async fn test_upload_rejects_missing_and_directory_paths() {
    let (transport, client) = client_with(MockTransport::new());
    let dir = TempDir::new().unwrap();

    let missing = dir.path().join("nope.pdf");
    let err = upload_file(&client, &upload_base(), "nb_1", &missing).await.unwrap_err();
    assert!(matches!(err, Error::Upload(ref msg) if msg.contains("File not found")));

    let err = upload_file(&client, &upload_base(), "nb_1", dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::Upload(ref msg) if msg.contains("Not a regular file")));

    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_register_without_id_is_upload_error() {
    let (transport, client) = client_with(MockTransport::new());
    transport.push(result_response("o4cbdc", None));

    let err = register_file_source(&client, "nb_1", "a.txt").await.unwrap_err();
    assert!(matches!(err, Error::Upload(_)));
}

#[tokio::test]
async fn test_upload_step_failure_status() {
    let (transport, client) = client_with(MockTransport::new());
    transport.push(result_response("o4cbdc", Some(&tree!["src_new"])));
    transport.push(start_response());
    transport.push(response_with(500, ""));

    let file = NamedTempFile::new().unwrap();
    let err = upload_file(&client, &upload_base(), "nb_1", file.path()).await.unwrap_err();
    assert!(matches!(err, Error::Upload(ref msg) if msg.contains("HTTP 500")));
}
