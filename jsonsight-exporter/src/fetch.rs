//! Fetching the probed JSON document.

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::debug;

use crate::config::{BodyConfig, ModuleConfig};

/// Fetch errors.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").expect("valid placeholder pattern"));

/// Render `{{ .name }}` placeholders with the first value of query parameter
/// `name`. Unknown parameters render as empty strings.
pub fn render_body(body: &BodyConfig, params: &[(String, String)]) -> String {
    if !body.templatize {
        return body.content.clone();
    }

    PLACEHOLDER
        .replace_all(&body.content, |caps: &Captures<'_>| {
            let name = &caps[1];
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        })
        .into_owned()
}

/// HTTP client for one module.
pub struct Fetcher<'m> {
    module: &'m ModuleConfig,
    client: reqwest::Client,
    headers: HeaderMap,
}

impl<'m> Fetcher<'m> {
    pub fn new(module: &'m ModuleConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(module.http_client.timeout_secs))
            .danger_accept_invalid_certs(module.http_client.insecure_skip_verify)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            module,
            client,
            headers: build_headers(module)?,
        })
    }

    /// Fetch `target`, returning the response body.
    ///
    /// The request is a POST when the module has a body, a GET otherwise.
    pub async fn fetch(
        &self,
        target: &str,
        params: &[(String, String)],
    ) -> Result<Vec<u8>, FetchError> {
        let mut request = match &self.module.body {
            Some(body) => self.client.post(target).body(render_body(body, params)),
            None => self.client.get(target),
        };
        request = request.headers(self.headers.clone());

        let http = &self.module.http_client;
        if let Some(auth) = &http.basic_auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        } else if let Some(token) = &http.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(target = %target, status = %status, "Received response");

        if !self.is_valid_status(status.as_u16()) {
            return Err(FetchError::Status(status));
        }

        Ok(response.bytes().await?.to_vec())
    }

    fn is_valid_status(&self, code: u16) -> bool {
        if self.module.valid_status_codes.is_empty() {
            (200..300).contains(&code)
        } else {
            self.module.valid_status_codes.contains(&code)
        }
    }
}

fn build_headers(module: &ModuleConfig) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &module.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        headers.append(header_name, header_value);
    }

    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    }

    Ok(headers)
}
