use thiserror::Error;

/// Typed failures crossing the client's public boundaries.
///
/// Expected outcomes are not errors: a duplicate upload is an
/// [`UploadResponse::Duplicate`](crate::messages::UploadResponse) verdict and
/// an empty query result is the `no_data` status on
/// [`AskResponse`](crate::messages::AskResponse).
#[derive(Debug, Error)]
pub enum ApiError {
    /// Not signed in, or the stored token was rejected by the backend.
    /// Surfaced by prompting for sign-in, never retried silently.
    #[error("not authenticated: {0}")]
    Authentication(String),

    /// Transport failure before a usable response was received
    #[error("network error: {0}")]
    Network(String),

    /// Operating on a resource the server no longer knows about
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected client-side before any network call was made
    #[error("invalid input: {0}")]
    Validation(String),

    /// Backend or identity provider answered with an error status
    #[error("server error ({status}): {detail}")]
    Api { status: u16, detail: String },
}

impl ApiError {
    /// True when the fix is to (re-)authenticate rather than retry
    pub fn needs_login(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
    }
}
