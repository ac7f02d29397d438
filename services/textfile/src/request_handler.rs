//! Per-request orchestration.
//!
//! Every request walks the same path: authorize, validate, execute. A
//! failure at any step ends the request with the matching error and later
//! steps never run; in particular storage is not touched for callers the
//! authorizer rejects or for malformed input.

use crate::authorizer::Authorizer;
use crate::content_codec::{decode_lines, infer_kind, ContentKind, TextFileKey};
use crate::error::ServiceError;
use crate::storage_gateway::StorageGateway;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Acknowledgement returned after a successful write
pub const WRITE_ACK: &str = "components updated succesfully";

/// Raw query parameters of a read request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadParams {
    pub compid: Option<String>,
    pub filetype: Option<String>,
}

/// Body of a write request
#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub compid: i64,
    pub filetype: String,
    pub file: Vec<String>,
}

/// A reconstructed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub text: String,
    pub kind: ContentKind,
}

/// Response body of a successful write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub detail: String,
}

/// Handles text file reads and writes for the HTTP layer
pub struct RequestHandler {
    authorizer: Arc<dyn Authorizer>,
    gateway: Arc<StorageGateway>,
}

impl RequestHandler {
    pub fn new(authorizer: Arc<dyn Authorizer>, gateway: Arc<StorageGateway>) -> Self {
        Self {
            authorizer,
            gateway,
        }
    }

    pub fn gateway(&self) -> &StorageGateway {
        &self.gateway
    }

    /// Load and decode a file.
    ///
    /// `default_file_type` is used when the caller gave no `filetype`.
    #[instrument(skip(self, session_cookie))]
    pub async fn read(
        &self,
        session_cookie: Option<String>,
        params: ReadParams,
        default_file_type: Option<&str>,
    ) -> Result<TextDocument, ServiceError> {
        self.authorize(session_cookie).await?;

        let key = validate_read(&params, default_file_type)?;

        let lines = self.gateway.read_file(&key).await?;
        let text = decode_lines(&lines)?;
        let kind = infer_kind(&key.file_type, &text);

        info!(
            compid = key.component_id,
            filetype = %key.file_type,
            line_count = lines.len(),
            kind = ?kind,
            "Text file read"
        );

        Ok(TextDocument { text, kind })
    }

    /// Replace a file with the lines in a JSON request body.
    #[instrument(skip(self, session_cookie, body), fields(body_len = body.len()))]
    pub async fn write(
        &self,
        session_cookie: Option<String>,
        body: &[u8],
    ) -> Result<Message, ServiceError> {
        self.authorize(session_cookie).await?;

        let (key, lines) = validate_write(body)?;

        self.gateway.replace_file(&key, &lines).await?;

        info!(
            compid = key.component_id,
            filetype = %key.file_type,
            line_count = lines.len(),
            "Text file replaced"
        );

        Ok(Message {
            detail: WRITE_ACK.to_string(),
        })
    }

    async fn authorize(&self, session_cookie: Option<String>) -> Result<(), ServiceError> {
        self.authorizer.authorize(session_cookie).await.map_err(|e| {
            metrics::counter!("textfile.auth.rejected").increment(1);
            ServiceError::from(e)
        })
    }
}

/// Check read parameters and build the file key
pub fn validate_read(
    params: &ReadParams,
    default_file_type: Option<&str>,
) -> Result<TextFileKey, ServiceError> {
    let compid = params
        .compid
        .as_deref()
        .ok_or_else(|| invalid("compid: field required"))?;
    let component_id = compid
        .trim()
        .parse::<i64>()
        .map_err(|_| invalid("compid: value is not a valid integer"))?;
    validate_component_id(component_id)?;

    let file_type = params
        .filetype
        .as_deref()
        .or(default_file_type)
        .ok_or_else(|| invalid("filetype: field required"))?;
    validate_file_type(file_type)?;

    Ok(TextFileKey::new(component_id, file_type))
}

/// Parse and check a write request body
pub fn validate_write(body: &[u8]) -> Result<(TextFileKey, Vec<String>), ServiceError> {
    let request: WriteRequest = serde_json::from_slice(body)
        .map_err(|e| ServiceError::InvalidInput(format!("Invalid request body: {}", e)))?;

    validate_component_id(request.compid)?;
    validate_file_type(&request.filetype)?;

    Ok((
        TextFileKey::new(request.compid, request.filetype),
        request.file,
    ))
}

fn validate_component_id(component_id: i64) -> Result<(), ServiceError> {
    if component_id < 1 {
        return Err(invalid("compid: ensure this value is greater than or equal to 1"));
    }
    Ok(())
}

fn validate_file_type(file_type: &str) -> Result<(), ServiceError> {
    if file_type.trim().is_empty() {
        return Err(invalid("filetype: must not be empty or whitespace"));
    }
    Ok(())
}

fn invalid(message: &str) -> ServiceError {
    ServiceError::InvalidInput(message.to_string())
}
