//! Resumable file upload.
//!
//! Three steps: register the source over RPC to get its ID, open an upload
//! session for that ID, then send the bytes in one finalizing request.

use std::path::Path;

use nlm_rpc::{Tree, tree};
use serde_json::json;
use tracing::{debug, info};

use crate::client::RpcClient;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::methods::RpcMethod;
use crate::sources::notebook_path;
use crate::{Error, Result};

const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// `ADD_SOURCE_FILE` parameters
#[must_use]
pub fn register_params(notebook_id: &str, filename: &str) -> Tree {
    let nulls = std::iter::repeat_n(Tree::Null, 9);
    let options: Vec<Tree> = std::iter::once(Tree::from(1))
        .chain(nulls)
        .chain(std::iter::once(tree![1]))
        .collect();
    tree![tree![tree![filename]], notebook_id, tree![2], options]
}

/// Register the file and return the new source ID.
///
/// # Errors
///
/// [`Error::Upload`] if the response carries no ID, or any call error.
pub async fn register_file_source<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    notebook_id: &str,
    filename: &str,
) -> Result<String> {
    let payload = client
        .call(
            RpcMethod::AddSourceFile,
            register_params(notebook_id, filename),
            Some(&notebook_path(notebook_id)),
        )
        .await?;

    payload
        .as_ref()
        .and_then(Tree::first_string)
        .map(str::to_string)
        .ok_or_else(|| Error::Upload("No source ID in registration response".into()))
}

fn upload_request<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    url: String,
    body: Vec<u8>,
    cookie: String,
) -> HttpRequest {
    HttpRequest::post(url, body)
        .with_header("Accept", "*/*")
        .with_header("Content-Type", FORM_CONTENT_TYPE)
        .with_header("Cookie", cookie)
        .with_header("Origin", client.base_url().to_string())
        .with_header("Referer", format!("{}/", client.base_url()))
        .with_header("x-goog-authuser", "0")
}

fn check_upload_status(step: &str, response: &HttpResponse) -> Result<()> {
    match response.status {
        _ if response.is_success() => Ok(()),
        401 | 403 => Err(Error::AuthExpired(format!(
            "Upload {step} returned HTTP {}",
            response.status
        ))),
        status => Err(Error::Upload(format!("{step} failed with HTTP {status}"))),
    }
}

/// Open a resumable session and return the URL to send bytes to.
///
/// # Errors
///
/// [`Error::Upload`] on a failing status or a missing upload URL header.
pub async fn start_upload<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    upload_url: &str,
    notebook_id: &str,
    filename: &str,
    file_size: u64,
    source_id: &str,
) -> Result<String> {
    let (_, credentials) = client.session().snapshot().await;
    let body = json!({
        "PROJECT_ID": notebook_id,
        "SOURCE_NAME": filename,
        "SOURCE_ID": source_id,
    });

    let request = upload_request(
        client,
        format!("{upload_url}?authuser=0"),
        serde_json::to_vec(&body)?,
        credentials.cookie_header(),
    )
    .with_header("x-goog-upload-command", "start")
    .with_header("x-goog-upload-header-content-length", file_size.to_string())
    .with_header("x-goog-upload-protocol", "resumable");

    let response = client.transport().send(request).await?;
    check_upload_status("start", &response)?;

    let session_url = response
        .header(UPLOAD_URL_HEADER)
        .ok_or_else(|| Error::Upload(format!("Response has no {UPLOAD_URL_HEADER} header")))?;
    debug!(source_id, "Upload session opened");
    Ok(session_url.to_string())
}

/// Send the whole file and finalize the session.
///
/// # Errors
///
/// [`Error::Upload`] on a failing status, or any transport error.
pub async fn upload_bytes<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    session_url: &str,
    bytes: Vec<u8>,
) -> Result<()> {
    let (_, credentials) = client.session().snapshot().await;
    let request = upload_request(client, session_url.to_string(), bytes, credentials.cookie_header())
        .with_header("x-goog-upload-command", "upload, finalize")
        .with_header("x-goog-upload-offset", "0");

    let response = client.transport().send(request).await?;
    check_upload_status("upload", &response)
}

/// Register, open a session and upload `path`; returns the source ID.
///
/// # Errors
///
/// [`Error::Upload`] if the path is missing or not a regular file, or any
/// error from the three steps.
pub async fn upload_file<T: HttpTransport + ?Sized>(
    client: &RpcClient<T>,
    upload_url: &str,
    notebook_id: &str,
    path: &Path,
) -> Result<String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::Upload(format!("File not found: {} ({e})", path.display())))?;
    if !metadata.is_file() {
        return Err(Error::Upload(format!("Not a regular file: {}", path.display())));
    }

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Upload(format!("Unusable file name: {}", path.display())))?;

    let source_id = register_file_source(client, notebook_id, filename).await?;
    let session_url = start_upload(
        client,
        upload_url,
        notebook_id,
        filename,
        metadata.len(),
        &source_id,
    )
    .await?;

    let bytes = tokio::fs::read(path).await?;
    upload_bytes(client, &session_url, bytes).await?;

    info!(notebook_id, source_id, filename, "File uploaded");
    Ok(source_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_params_shape() {
        assert_eq!(
            register_params("nb_1", "paper.pdf").to_string(),
            r#"[[["paper.pdf"]],"nb_1",[2],[1,null,null,null,null,null,null,null,null,null,[1]]]"#
        );
    }

    #[test]
    fn test_check_upload_status() {
        let response = |status| HttpResponse {
            status,
            final_url: String::new(),
            headers: Vec::new(),
            body: String::new(),
        };
        assert!(check_upload_status("start", &response(200)).is_ok());
        assert!(check_upload_status("start", &response(401)).unwrap_err().is_auth_expired());
        assert!(matches!(
            check_upload_status("upload", &response(500)),
            Err(Error::Upload(_))
        ));
    }
}
