use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Backend API Types
// ============================================================================

/// A user-owned tabular resource derived from an uploaded CSV.
///
/// The backend owns these; the client holds a read-through cache that is
/// replaced wholesale on every list fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Server-assigned unique id
    pub id: String,
    /// Display name shown in dataset pickers
    pub dataset_name: String,
    /// Filename of the CSV the dataset was created from
    pub original_filename: String,
    /// Backing SQL table name
    pub table_name: String,
    /// Column names in schema order
    pub column_names: Vec<String>,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Response body of `GET /datasets`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetsResponse {
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

/// Server verdict for `POST /upload`.
///
/// The duplicate case is a distinct outcome requiring a user decision, not a
/// failure: the server matched the uploaded content against an existing
/// dataset by fingerprint and reports the conflicting dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadResponse {
    /// Uploaded content matches an existing dataset
    Duplicate {
        duplicate: bool,
        existing_dataset: Dataset,
    },
    /// Upload finished (either a fresh ingest or a reuse of an existing one)
    Completed {
        success: bool,
        #[serde(default)]
        dataset_id: Option<String>,
        #[serde(default)]
        reused: bool,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Request body of `POST /ask`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub dataset_id: String,
}

/// Response body of `POST /ask`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(default)]
    pub generated_sql: Option<String>,
    /// `"no_data"` means the generated query matched no rows; it is a
    /// recognized empty result, not an error
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AskResponse {
    pub fn is_no_data(&self) -> bool {
        self.status.as_deref() == Some("no_data")
    }
}

/// Response body of `DELETE /datasets/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Error body the backend attaches to non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
}

// ============================================================================
// Identity Provider Types
// ============================================================================

/// Credential sign-in / sign-up request for the provider's token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Authenticated user as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// Successful response from the provider's password-grant token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub user: AuthUser,
}

/// Error body from the identity provider (field name varies by endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthErrorBody {
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl AuthErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.error_description.or(self.msg)
    }
}

// ============================================================================
// Tests
// ============================================================================
