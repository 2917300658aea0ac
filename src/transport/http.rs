//! reqwest-backed [`Sender`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use super::{SendError, Sender};
use crate::config::{ClientConfig, Credential};
use crate::error::{ApiError, ApiResult};
use crate::http::{ApiRequest, FileUpload, RawResponse, RequestBody, headers};

/// Sends requests to the remote API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    base_url: String,
    credential: Option<Credential>,
}

impl HttpSender {
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the underlying HTTP client cannot be
    /// built.
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            credential: config.credential.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, SendError> {
        let mut builder = self
            .client
            .request(request.method.into(), self.url(&request.path));

        let mut query: Vec<(&str, &str)> = request.query.iter().collect();
        match &self.credential {
            Some(Credential::ApiToken(token)) => query.push(("api_token", token.as_str())),
            Some(Credential::Bearer(token)) => builder = builder.bearer_auth(token),
            None => {}
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart { file, fields } => builder.multipart(multipart(file, fields)?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let retry_after = headers::retry_after(response.headers());
        let rate_limit_remaining = headers::rate_limit_remaining(response.headers());
        let body = response.bytes().await?;

        debug!(status, bytes = body.len(), "response received");
        Ok(RawResponse {
            status,
            retry_after,
            rate_limit_remaining,
            body,
        })
    }
}

fn multipart(file: &FileUpload, fields: &[(String, String)]) -> Result<Form, SendError> {
    let mut part = Part::bytes(file.bytes.to_vec()).file_name(file.file_name.clone());
    if let Some(content_type) = &file.content_type {
        part = part
            .mime_str(content_type)
            .map_err(|e| SendError::new(format!("invalid content type {content_type:?}: {e}")))?;
    }

    let form = fields
        .iter()
        .fold(Form::new().part("file", part), |form, (name, value)| {
            form.text(name.clone(), value.clone())
        });
    Ok(form)
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_with_single_slash() {
        let config = ClientConfig {
            base_url: "https://acme.pipedrive.com/".into(),
            ..ClientConfig::default()
        };
        let sender = HttpSender::new(&config).unwrap();
        assert_eq!(sender.url("/v1/deals"), "https://acme.pipedrive.com/v1/deals");
        assert_eq!(sender.url("v1/deals"), "https://acme.pipedrive.com/v1/deals");
    }

    #[test]
    fn rejects_bad_content_type() {
        let file = FileUpload::new("a.txt", "hi").with_content_type("not a mime");
        assert!(multipart(&file, &[]).is_err());
    }
}
