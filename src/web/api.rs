//! This module defines the HTTP API endpoints of the receiver service.
use super::AppState;
use crate::crypto::protocol::{self, REQUIRED_ENVELOPE_FIELDS};
use crate::error::TransferError;
use crate::transfer::policy;
use crate::transfer::verdict::INTEGRITY_HEADER;
use crate::transfer::IntegrityVerdict;
use crate::types::{ArtifactSummary, Principal, TransferEnvelope};
use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = match &self {
            TransferError::Validation(_)
            | TransferError::IntegrityViolation
            | TransferError::KeyUnwrap
            | TransferError::PayloadDecrypt => StatusCode::BAD_REQUEST,
            TransferError::AccessDenied => StatusCode::FORBIDDEN,
            TransferError::RecordNotFound | TransferError::NotFoundOnDisk => StatusCode::NOT_FOUND,
            TransferError::Storage(e) => {
                error!("Storage failure while handling request: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut body = json!({
            "success": false,
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if self.is_integrity_failure() {
            body["status"] = json!(IntegrityVerdict::Contaminated.as_str());
        }

        (status, Json(body)).into_response()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "error": "Unauthorized", "kind": "unauthorized" })),
    )
        .into_response()
}

fn principal_of(state: &AppState, headers: &HeaderMap) -> Result<Principal, Response> {
    state.resolver.resolve(headers).ok_or_else(unauthorized)
}

/// Query parameters carrying an artifact id.
#[derive(Deserialize)]
pub struct IdQuery {
    id: Option<String>,
}

impl IdQuery {
    fn require_id(self) -> Result<String, TransferError> {
        self.id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransferError::Validation("File id is required".into()))
    }
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    id: Option<String>,
    verify: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    admin: Option<String>,
    sent: Option<String>,
}

/// Response body of the verify-only download.
#[derive(Serialize)]
pub struct VerifyResponse {
    valid: bool,
    message: IntegrityVerdict,
    filename: String,
}

/// Returns the public key bootstrap document.
#[axum::debug_handler]
pub async fn public_key(State(state): State<Arc<AppState>>) -> Response {
    match state.service.keys().bootstrap().await {
        Ok(bootstrap) => Json(bootstrap).into_response(),
        Err(e) => TransferError::storage(e).into_response(),
    }
}

/// Describes the external upload endpoint.
#[axum::debug_handler]
pub async fn upload_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/api/external/upload",
        "method": "POST",
        "description": "Upload encrypted files from third-party systems",
        "contentType": "application/json",
        "requiredFields": {
            "encryptedData": "AES-256-CBC encrypted file content (base64)",
            "encryptedKey": "RSA-encrypted AES key (base64)",
            "iv": "Initialization Vector (hex, 32 characters)",
            "hmac": "HMAC-SHA256 of encryptedData (hex, 64 characters)",
            "filename": "Original filename",
        },
        "optionalFields": {
            "senderInfo": "Identifier for the sending system",
        },
        "getPublicKey": "/api/external/public-key",
    }))
}

/// Receives an encrypted envelope from a third-party sender.
#[axum::debug_handler]
pub async fn external_upload(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransferEnvelope>, JsonRejection>,
) -> Response {
    let Json(envelope) = match payload {
        Ok(envelope) => envelope,
        Err(rejection) => {
            warn!("Rejected malformed external upload: {}", rejection.body_text());
            return missing_fields();
        }
    };
    if protocol::validate_envelope(&envelope).is_err() {
        return missing_fields();
    }

    match state.service.receive_external(&envelope).await {
        Ok(received) => {
            info!(
                "External artifact {} accepted from '{}'",
                received.record.id, received.record.source_principal
            );
            Json(json!({
                "success": true,
                "message": "File received, verified, decrypted and stored successfully",
                "file": {
                    "id": received.record.id,
                    "filename": received.stored_name,
                    "originalName": received.record.filename,
                    "size": received.size,
                    "source": "external",
                    "integrityStatus": IntegrityVerdict::Clean.as_str(),
                },
            }))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn missing_fields() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "error": "Missing required fields",
            "kind": "validation",
            "required": REQUIRED_ENVELOPE_FIELDS,
        })),
    )
        .into_response()
}

/// Uploads a file on behalf of another principal. Admins only.
///
/// Expects a multipart form with a `file` part and a `targetUser` field.
#[axum::debug_handler]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let actor = match principal_of(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if !policy::can_upload(&actor) {
        return TransferError::AccessDenied.into_response();
    }

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut target_user: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return TransferError::Validation(format!("Invalid form data: {}", e)).into_response()
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((filename, bytes.to_vec())),
                    Err(e) => {
                        return TransferError::Validation(format!("Invalid file part: {}", e))
                            .into_response()
                    }
                }
            }
            Some("targetUser") => match field.text().await {
                Ok(text) => target_user = Some(text.trim().to_string()),
                Err(e) => {
                    return TransferError::Validation(format!("Invalid targetUser: {}", e))
                        .into_response()
                }
            },
            _ => {}
        }
    }

    let (Some((filename, bytes)), Some(target_user)) = (file, target_user) else {
        return TransferError::Validation("File and target user are required".into())
            .into_response();
    };

    match state
        .service
        .upload(&bytes, &filename, &target_user, &actor.id)
        .await
    {
        Ok(record) => Json(json!({
            "success": true,
            "message": "File uploaded",
            "fileId": record.id,
            "file": ArtifactSummary::from_record(&record, true),
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Lists the caller's artifacts. `?admin=true` from an admin lists every
/// artifact; `?sent=true` lists what the caller uploaded for others.
#[axum::debug_handler]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let principal = match principal_of(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let admin_view = query.admin.as_deref() == Some("true") && principal.is_admin();
    let files = if admin_view {
        state.service.list_all(&principal).await
    } else if query.sent.as_deref() == Some("true") {
        state.service.list_sent_by(&principal).await
    } else {
        state.service.list_for(&principal).await
    };

    match files {
        Ok(files) => Json(json!({ "files": files })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Lists the artifacts received from external senders. Admins only.
#[axum::debug_handler]
pub async fn list_external(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let principal = match principal_of(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match state.service.list_external(&principal).await {
        Ok(files) => Json(json!({ "files": files })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Downloads an artifact with its integrity verdict in `X-Integrity-Status`,
/// or only reports the verdict for `?verify=true`.
#[axum::debug_handler]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let principal = match principal_of(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let verify_only = query.verify.as_deref() == Some("true");
    let id = match (IdQuery { id: query.id }).require_id() {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    if verify_only {
        return match state.service.verify(&id, &principal).await {
            Ok((record, verdict)) => Json(VerifyResponse {
                valid: verdict.is_clean(),
                message: verdict,
                filename: record.filename,
            })
            .into_response(),
            Err(e) => e.into_response(),
        };
    }

    match state.service.download(&id, &principal).await {
        Ok(download) => {
            let verdict = download.verdict();
            let disposition = format!(
                "attachment; filename=\"{}\"",
                header_safe_filename(&download.record.filename)
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE.as_str(), "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION.as_str(), disposition),
                    (INTEGRITY_HEADER, verdict.to_string()),
                ],
                download.plaintext,
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Deletes an artifact; `policy::can_delete` decides who may.
#[axum::debug_handler]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<IdQuery>,
) -> Response {
    let actor = match principal_of(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let id = match query.require_id() {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    match state.service.delete(&id, &actor).await {
        Ok(true) => Json(json!({ "success": true, "message": "File deleted" })).into_response(),
        Ok(false) => TransferError::RecordNotFound.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Keeps printable ASCII other than quotes and backslashes; everything else becomes `_`.
fn header_safe_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_filenames_are_quoted_safely() {
        assert_eq!(header_safe_filename("q3 report.pdf"), "q3 report.pdf");
        assert_eq!(header_safe_filename("a\"b\\c\r\n.txt"), "a_b_c__.txt");
        assert_eq!(header_safe_filename("naïve.txt"), "na_ve.txt");
    }

    #[test]
    fn error_status_codes() {
        let cases = [
            (TransferError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (TransferError::IntegrityViolation, StatusCode::BAD_REQUEST),
            (TransferError::KeyUnwrap, StatusCode::BAD_REQUEST),
            (TransferError::PayloadDecrypt, StatusCode::BAD_REQUEST),
            (TransferError::AccessDenied, StatusCode::FORBIDDEN),
            (TransferError::RecordNotFound, StatusCode::NOT_FOUND),
            (TransferError::NotFoundOnDisk, StatusCode::NOT_FOUND),
            (
                TransferError::storage(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
