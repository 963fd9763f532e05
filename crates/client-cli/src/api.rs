//! Backend API client.
//!
//! [`Backend`] is the seam between the session controller and the HTTP
//! service; tests substitute an in-memory implementation. [`HttpBackend`]
//! is the real thing: bearer-authenticated JSON over reqwest, with the
//! backend's `{"detail": ...}` error bodies mapped into [`ApiError`].

use async_trait::async_trait;
use shared::{
    ApiError, ApiErrorBody, AskRequest, AskResponse, Dataset, DatasetsResponse, DeleteResponse,
    UploadResponse,
};

/// Flags forwarded to `POST /upload` as query parameters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UploadOptions {
    /// Create a distinct copy even if the content fingerprint matches
    pub force_upload: bool,
    /// Bind the matching existing dataset instead of re-ingesting
    pub reuse: bool,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_datasets(&self, token: &str) -> Result<Vec<Dataset>, ApiError>;

    async fn upload(
        &self,
        token: &str,
        filename: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<UploadResponse, ApiError>;

    async fn delete_dataset(&self, token: &str, id: &str) -> Result<(), ApiError>;

    async fn ask(&self, token: &str, request: &AskRequest) -> Result<AskResponse, ApiError>;
}

pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Converts a non-2xx response into the typed taxonomy, pulling the
    /// human-readable message out of the `{"detail": ...}` body when present
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let detail = resp
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.detail)
            .unwrap_or_else(|| "Request failed".to_string());

        Err(match status.as_u16() {
            401 | 403 => ApiError::Authentication(detail),
            404 => ApiError::NotFound(detail),
            code => ApiError::Api {
                status: code,
                detail,
            },
        })
    }
}

fn network(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_datasets(&self, token: &str) -> Result<Vec<Dataset>, ApiError> {
        let resp = self
            .http
            .get(format!("{}/datasets", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(network)?;

        let body: DatasetsResponse = Self::check(resp).await?.json().await.map_err(network)?;
        Ok(body.datasets)
    }

    async fn upload(
        &self,
        token: &str,
        filename: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<UploadResponse, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("text/csv")
            .map_err(network)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut query: Vec<(&str, &str)> = Vec::new();
        if options.force_upload {
            query.push(("force_upload", "true"));
        }
        if options.reuse {
            query.push(("reuse", "true"));
        }

        let resp = self
            .http
            .post(format!("{}/upload", self.base_url))
            .bearer_auth(token)
            .query(&query)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;

        Self::check(resp).await?.json().await.map_err(network)
    }

    async fn delete_dataset(&self, token: &str, id: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .delete(format!("{}/datasets/{}", self.base_url, id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(network)?;

        let body: DeleteResponse = Self::check(resp).await?.json().await.map_err(network)?;
        if body.success {
            Ok(())
        } else {
            Err(ApiError::Api {
                status: 200,
                detail: "Delete was not acknowledged".to_string(),
            })
        }
    }

    async fn ask(&self, token: &str, request: &AskRequest) -> Result<AskResponse, ApiError> {
        let resp = self
            .http
            .post(format!("{}/ask", self.base_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(network)?;

        Self::check(resp).await?.json().await.map_err(network)
    }
}
