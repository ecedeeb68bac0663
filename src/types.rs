use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Owner used for artifacts submitted by external senders.
pub const UPLOADS_SENTINEL: &str = "uploads";

/// Source recorded when an external sender does not identify itself.
pub const DEFAULT_EXTERNAL_SOURCE: &str = "external-system";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AlgorithmSuite {
    pub asymmetric: String,
    pub symmetric: String,
    pub mac: String,
}

impl AlgorithmSuite {
    pub fn current() -> Self {
        Self {
            asymmetric: "RSA-2048-OAEP-SHA256".to_string(),
            symmetric: "AES-256-CBC".to_string(),
            mac: "HMAC-SHA256".to_string(),
        }
    }
}

/// The public key exchange document served to senders.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyBootstrap {
    #[serde(default = "default_true")]
    pub success: bool,
    pub public_key: String,
    pub hmac_key: String,
    pub algorithm: AlgorithmSuite,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl PublicKeyBootstrap {
    pub fn new(public_key: String, hmac_key: String, algorithm: AlgorithmSuite) -> Self {
        Self {
            success: true,
            public_key,
            hmac_key,
            algorithm,
            instructions: Some(serde_json::json!({
                "step1": "Generate a random AES-256 key and IV",
                "step2": "Encrypt your file using AES-256-CBC with the key and IV",
                "step3": "Encrypt the AES key using this RSA public key",
                "step4": "Calculate HMAC-SHA256 of the encrypted data using the hmacKey",
                "step5": "Send encrypted data, encrypted key, IV, and HMAC to /api/external/upload",
            })),
        }
    }
}

/// The bundle a sender ships to the receiver.
///
/// `hmac` authenticates `encrypted_data` only, exactly as transmitted
/// (Encrypt-then-MAC).
///
/// Absent fields deserialize as empty so validation can name all of them.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferEnvelope {
    /// AES-256-CBC ciphertext, base64.
    pub encrypted_data: String,
    /// RSA-OAEP wrapped symmetric key, base64.
    pub encrypted_key: String,
    /// Initialization vector, hex.
    pub iv: String,
    /// HMAC-SHA256 of `encrypted_data`, hex.
    pub hmac: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_info: Option<String>,
}

/// Integrity metadata for one stored artifact.
///
/// Created once on upload and never modified apart from the descriptive
/// fields `ArtifactPatch` allows; removed together with the file on delete.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub id: String,
    pub filename: String,
    pub filetype: String,
    /// HMAC-SHA256 of the stored plaintext, hex.
    pub integrity_hash: String,
    /// Hex key used for `integrity_hash`; unique to this artifact.
    pub integrity_key: String,
    pub owner_principal: String,
    pub source_principal: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn is_external(&self) -> bool {
        self.owner_principal == UPLOADS_SENTINEL
    }
}

/// Fields of an `ArtifactRecord` that may be changed after creation.
///
/// Identity, ownership, the stored filename and the integrity fields are
/// deliberately absent.
#[allow(dead_code)]
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPatch {
    pub filetype: Option<String>,
    pub source_principal: Option<String>,
}

/// An artifact as shown in listings. Never carries integrity material.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub id: String,
    pub filename: String,
    pub filetype: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_for: Option<String>,
}

impl ArtifactSummary {
    pub fn from_record(record: &ArtifactRecord, include_owner: bool) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            filetype: record.filetype.clone(),
            uploaded_at: record.created_at,
            uploaded_by: record.source_principal.clone(),
            uploaded_for: include_owner.then(|| record.owner_principal.clone()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller, as supplied by the authentication collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
