//! Third-party sender: encrypts a local file and submits it to a receiver.
use crate::crypto::{engine, package_for_transfer, MacKey};
use crate::types::PublicKeyBootstrap;
use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

const PUBLIC_KEY_ENDPOINT: &str = "/api/external/public-key";
const UPLOAD_ENDPOINT: &str = "/api/external/upload";

/// Options for a single send.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub server: String,
    pub sender_info: Option<String>,
    pub insecure: bool,
}

/// Fetches the receiver's bootstrap document, packages `file` and uploads it.
///
/// Returns the receiver's JSON response on success.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the receiver is unreachable,
/// the bootstrap document is unusable, or the receiver rejects the envelope.
pub async fn send_file(file: &Path, options: &SendOptions) -> Result<Value> {
    let plaintext = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", file.display()))?;

    let client = Client::builder()
        .danger_accept_invalid_certs(options.insecure)
        .build()?;
    let base = options.server.trim_end_matches('/');

    let bootstrap: PublicKeyBootstrap = client
        .get(format!("{}{}", base, PUBLIC_KEY_ENDPOINT))
        .send()
        .await
        .with_context(|| format!("fetching public key from {}", base))?
        .error_for_status()?
        .json()
        .await
        .context("decoding public key document")?;
    info!(
        "Received public key ({} / {} / {})",
        bootstrap.algorithm.asymmetric, bootstrap.algorithm.symmetric, bootstrap.algorithm.mac
    );

    let public_key = engine::public_key_from_pem(&bootstrap.public_key)?;
    let mac_key = MacKey::from_hex(&bootstrap.hmac_key)?;

    let mut envelope = package_for_transfer(&plaintext, filename, &public_key, &mac_key)?;
    envelope.sender_info = options.sender_info.clone();
    debug!(
        "Packaged {} ({} bytes, {} base64 chars)",
        filename,
        plaintext.len(),
        envelope.encrypted_data.len()
    );

    let response = client
        .post(format!("{}{}", base, UPLOAD_ENDPOINT))
        .json(&envelope)
        .send()
        .await
        .with_context(|| format!("uploading to {}", base))?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status != StatusCode::OK {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no error message");
        let verdict = body.get("status").and_then(Value::as_str).unwrap_or("");
        bail!("Receiver rejected upload ({}): {} {}", status, reason, verdict);
    }

    Ok(body)
}

/// Prints the receiver's verdict for a successful upload.
pub fn print_receipt(body: &Value) {
    let file = &body["file"];
    println!("File sent.");
    println!("  ID:               {}", file["id"].as_str().unwrap_or("?"));
    println!("  Stored as:        {}", file["filename"].as_str().unwrap_or("?"));
    println!("  Size:             {} bytes", file["size"]);
    println!(
        "  Integrity status: {}",
        file["integrityStatus"].as_str().unwrap_or("unknown")
    );
}
