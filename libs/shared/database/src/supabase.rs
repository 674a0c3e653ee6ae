use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum SupabaseError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 409 from PostgREST: unique or exclusion constraint violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl SupabaseError {
    fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => SupabaseError::Auth(body),
            404 => SupabaseError::NotFound(body),
            409 => SupabaseError::Conflict(body),
            code => SupabaseError::Api { status: code, message: body },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SupabaseError::Conflict(_))
    }
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, SupabaseError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, SupabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, SupabaseError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status == StatusCode::CONFLICT {
                debug!("Supabase rejected write with conflict: {}", error_text);
            } else {
                error!("API error ({}): {}", status, error_text);
            }
            return Err(SupabaseError::from_status(status, error_text));
        }

        // PostgREST answers 204 with an empty body when no representation is requested.
        let bytes = response.bytes().await?;
        let raw: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice::<T>(raw).map_err(|e| SupabaseError::Decode(e.to_string()))
    }

    /// Headers asking PostgREST to echo written rows back.
    pub fn return_representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("return=representation"),
        );
        headers
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
