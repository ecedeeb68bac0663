pub mod api;
pub mod auth;

use crate::transfer::TransferService;
use anyhow::Result;
use auth::PrincipalResolver;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Shared state handed to every handler.
pub struct AppState {
    pub service: Arc<TransferService>,
    pub resolver: Arc<dyn PrincipalResolver>,
}

/// Room for base64 expansion and the JSON framing around an envelope.
fn body_limit(max_payload_bytes: usize) -> usize {
    max_payload_bytes / 3 * 4 + 64 * 1024
}

/// Cross-origin requests may reach the sender endpoints only, and never with
/// principal headers.
fn external_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn router(state: Arc<AppState>) -> Router {
    let max_payload_bytes = state.service.max_payload_bytes();
    let external = Router::new()
        .route("/api/external/public-key", get(api::public_key))
        .route(
            "/api/external/upload",
            get(api::upload_info).post(api::external_upload),
        )
        .layer(external_cors());

    let files = Router::new()
        .route("/api/files/upload", post(api::upload_file))
        .route("/api/files/list", get(api::list_files))
        .route("/api/files/download", get(api::download_file))
        .route("/api/files/delete", delete(api::delete_file))
        .route("/api/external/files", get(api::list_external));

    Router::new()
        .merge(external)
        .merge(files)
        .layer(DefaultBodyLimit::max(body_limit(max_payload_bytes)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>, bind: SocketAddr) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Receiver listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::engine::tests::shared_key_pair;
    use crate::crypto::{package_for_transfer, KeyStore, MacKey};
    use crate::storage::{FileStore, SledIntegrityLedger};
    use crate::transfer::verdict::INTEGRITY_HEADER;
    use crate::types::PublicKeyBootstrap;
    use auth::{HeaderPrincipalResolver, PRINCIPAL_ID_HEADER, PRINCIPAL_ROLE_HEADER};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _temp: TempDir,
        app: Router,
    }

    fn harness() -> Harness {
        harness_with_limit(1024 * 1024)
    }

    fn harness_with_limit(max_payload_bytes: usize) -> Harness {
        let temp = TempDir::new().unwrap();
        let keys = Arc::new(KeyStore::preloaded(
            temp.path().join("keys"),
            shared_key_pair().clone(),
            MacKey::generate(),
        ));
        let ledger = Arc::new(
            SledIntegrityLedger::new(sled::open(temp.path().join("ledger")).unwrap()).unwrap(),
        );
        let files = Arc::new(FileStore::new(temp.path().join("files")).unwrap());
        let state = Arc::new(AppState {
            service: Arc::new(
                TransferService::new(keys, ledger, files).with_max_payload_bytes(max_payload_bytes),
            ),
            resolver: Arc::new(HeaderPrincipalResolver::default()),
        });
        Harness {
            _temp: temp,
            app: router(state),
        }
    }

    fn get_as(uri: &str, who: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some((id, role)) = who {
            builder = builder
                .header(PRINCIPAL_ID_HEADER, id)
                .header(PRINCIPAL_ROLE_HEADER, role);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn bootstrap(app: &Router) -> PublicKeyBootstrap {
        let response = app
            .clone()
            .oneshot(get_as("/api/external/public-key", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send_external(app: &Router, plaintext: &[u8], filename: &str) -> Value {
        let doc = bootstrap(app).await;
        let public_key = crate::crypto::engine::public_key_from_pem(&doc.public_key).unwrap();
        let mac_key = MacKey::from_hex(&doc.hmac_key).unwrap();
        let envelope = package_for_transfer(plaintext, filename, &public_key, &mac_key).unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/api/external/upload", &serde_json::to_value(&envelope).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    #[tokio::test]
    async fn public_key_document_has_no_private_material() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(get_as("/api/external/public-key", None))
            .await
            .unwrap();
        let body = json_body(response).await;

        assert_eq!(body["success"], true);
        assert!(body["publicKey"].as_str().unwrap().contains("BEGIN PUBLIC KEY"));
        assert_eq!(body["hmacKey"].as_str().unwrap().len(), 64);
        assert_eq!(body["algorithm"]["symmetric"], "AES-256-CBC");
        assert!(!body.to_string().contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn external_upload_then_admin_download() {
        let h = harness();
        let body = send_external(&h.app, b"hello from acme", "invoice 7.pdf").await;

        assert_eq!(body["success"], true);
        assert_eq!(body["file"]["integrityStatus"], "No contamination detected");
        assert_eq!(body["file"]["originalName"], "invoice 7.pdf");
        assert_eq!(body["file"]["size"], 15);
        let id = body["file"]["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("ext_"));

        let response = h
            .app
            .clone()
            .oneshot(get_as(&format!("/api/files/download?id={}", id), Some(("bob", "admin"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[INTEGRITY_HEADER],
            "No contamination detected"
        );
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"invoice 7.pdf\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello from acme");

        let response = h
            .app
            .clone()
            .oneshot(get_as(&format!("/api/files/download?id={}", id), Some(("alice", "user"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn tampered_envelope_is_contaminated() {
        let h = harness();
        let doc = bootstrap(&h.app).await;
        let public_key = crate::crypto::engine::public_key_from_pem(&doc.public_key).unwrap();
        let mac_key = MacKey::from_hex(&doc.hmac_key).unwrap();
        let mut envelope = package_for_transfer(b"payload", "a.txt", &public_key, &mac_key).unwrap();
        envelope.hmac = "ab".repeat(32);

        let response = h
            .app
            .clone()
            .oneshot(post_json("/api/external/upload", &serde_json::to_value(&envelope).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["status"], "Contaminated");
        assert_eq!(body["error"], "HMAC verification failed - file integrity compromised");
    }

    #[tokio::test]
    async fn missing_envelope_fields_are_listed() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(post_json("/api/external/upload", &serde_json::json!({ "filename": "a.txt" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Missing required fields");
        assert_eq!(body["required"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn upload_info_describes_fields() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(get_as("/api/external/upload", None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["method"], "POST");
        assert!(body["optionalFields"]["senderInfo"].is_string());
    }

    #[tokio::test]
    async fn file_routes_require_a_principal() {
        let h = harness();
        for uri in ["/api/files/list", "/api/files/download?id=x", "/api/external/files"] {
            let response = h.app.clone().oneshot(get_as(uri, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(get_as("/api/files/download?id=file_0_0", Some(("alice", "user"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "File not found");

        let response = h
            .app
            .clone()
            .oneshot(get_as("/api/files/download", Some(("alice", "user"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn multipart_upload(target: &str, filename: &str, content: &str, who: (&str, &str)) -> Request<Body> {
        let boundary = "sealdrop-test-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"targetUser\"\r\n\r\n{target}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: text/plain\r\n\r\n{content}\r\n--{b}--\r\n",
            b = boundary,
        );
        Request::builder()
            .method("POST")
            .uri("/api/files/upload")
            .header("content-type", format!("multipart/form-data; boundary={}", boundary))
            .header(PRINCIPAL_ID_HEADER, who.0)
            .header(PRINCIPAL_ROLE_HEADER, who.1)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn admin_upload_verify_list_delete() {
        let h = harness();

        let response = h
            .app
            .clone()
            .oneshot(multipart_upload("alice", "q3.txt", "numbers", ("alice", "user")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = h
            .app
            .clone()
            .oneshot(multipart_upload("alice", "q3.txt", "numbers", ("bob", "admin")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = json_body(response).await["fileId"].as_str().unwrap().to_string();
        assert!(id.starts_with("file_"));

        let response = h
            .app
            .clone()
            .oneshot(get_as(
                &format!("/api/files/download?id={}&verify=true", id),
                Some(("alice", "user")),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["message"], "No contamination detected");
        assert_eq!(body["filename"], "q3.txt");

        let response = h
            .app
            .clone()
            .oneshot(get_as("/api/files/list", Some(("alice", "user"))))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["files"].as_array().unwrap().len(), 1);
        assert_eq!(body["files"][0]["uploadedBy"], "bob");
        assert!(body["files"][0].get("uploadedFor").is_none());

        let response = h
            .app
            .clone()
            .oneshot(get_as("/api/files/list?admin=true", Some(("bob", "admin"))))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["files"][0]["uploadedFor"], "alice");

        let response = h
            .app
            .clone()
            .oneshot(get_as("/api/files/list?sent=true", Some(("bob", "admin"))))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["files"].as_array().unwrap().len(), 1);
        assert_eq!(body["files"][0]["id"], id.as_str());

        let delete = |who: (&str, &str)| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/files/delete?id={}", id))
                .header(PRINCIPAL_ID_HEADER, who.0)
                .header(PRINCIPAL_ROLE_HEADER, who.1)
                .body(Body::empty())
                .unwrap()
        };
        let response = h.app.clone().oneshot(delete(("alice", "user"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = h.app.clone().oneshot(delete(("dave", "admin"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = h.app.clone().oneshot(delete(("dave", "admin"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn payload_limit_applies_to_plaintext() {
        let h = harness_with_limit(1024);

        let response = h
            .app
            .clone()
            .oneshot(multipart_upload("alice", "big.txt", &"x".repeat(1025), ("bob", "admin")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "validation");

        let response = h
            .app
            .clone()
            .oneshot(multipart_upload("alice", "ok.txt", &"x".repeat(1024), ("bob", "admin")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let doc = bootstrap(&h.app).await;
        let public_key = crate::crypto::engine::public_key_from_pem(&doc.public_key).unwrap();
        let mac_key = MacKey::from_hex(&doc.hmac_key).unwrap();
        let envelope = package_for_transfer(&[0u8; 2000], "big.bin", &public_key, &mac_key).unwrap();
        let response = h
            .app
            .clone()
            .oneshot(post_json("/api/external/upload", &serde_json::to_value(&envelope).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "File exceeds the 1024-byte limit");
        assert!(body.get("status").is_none());
    }

    fn preflight(uri: &str, method: &str, headers: &str) -> Request<Body> {
        Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .header("origin", "https://elsewhere.example")
            .header("access-control-request-method", method)
            .header("access-control-request-headers", headers)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn cross_origin_callers_cannot_send_principal_headers() {
        let h = harness();

        for (uri, method) in [
            ("/api/files/delete?id=x", "DELETE"),
            ("/api/files/download?id=x", "GET"),
            ("/api/files/list", "GET"),
            ("/api/external/files", "GET"),
        ] {
            let response = h
                .app
                .clone()
                .oneshot(preflight(uri, method, "x-principal-id,x-principal-role"))
                .await
                .unwrap();
            assert!(
                response.headers().get("access-control-allow-origin").is_none(),
                "{}",
                uri
            );
        }

        let response = h
            .app
            .clone()
            .oneshot(preflight(
                "/api/external/upload",
                "POST",
                "content-type,x-principal-role",
            ))
            .await
            .unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let allowed = response.headers()["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(allowed.contains("content-type"));
        assert!(!allowed.contains("x-principal"));
    }
}
