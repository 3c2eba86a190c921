use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, ETAG, HeaderMap, HeaderName, HeaderValue, IF_NONE_MATCH};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;

use crate::error::{LibError, Result};

pub const WORKSPACE_HEADER: &str = "x-workspace-id";

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub workspace_id: Option<String>,
    pub if_none_match: Option<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            workspace_id: None,
            if_none_match: None,
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn workspace(mut self, workspace_id: Option<&str>) -> Self {
        self.workspace_id = workspace_id.map(str::to_string);
        self
    }

    pub fn if_none_match(mut self, etag: Option<String>) -> Self {
        self.if_none_match = etag;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// Converts any non-2xx status into an error.
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let body = String::from_utf8_lossy(&self.body);
        let snippet: String = body.chars().take(200).collect();
        Err(LibError::from_status(self.status, url, &snippet))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn headers(request: &ApiRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(workspace_id) = &request.workspace_id {
            headers.insert(
                HeaderName::from_static(WORKSPACE_HEADER),
                header_value(workspace_id)?,
            );
        }
        if let Some(etag) = &request.if_none_match {
            headers.insert(IF_NONE_MATCH, header_value(etag)?);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(name = "quest_api_send", skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let headers = Self::headers(&request)?;
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = response.bytes().await?.to_vec();
        tracing::debug!(status, bytes = body.len(), "quest api response");
        Ok(ApiResponse { status, etag, body })
    }
}

fn header_value(raw: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(raw).map_err(|err| {
        LibError::invalid(
            "Header value contains invalid characters",
            anyhow!("invalid header value {:?}: {}", raw, err),
        )
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone)]
    pub(crate) struct Scripted {
        pub response: ApiResponse,
        pub delay: Option<Duration>,
    }

    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Scripted>>,
        pub requests: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn push(&self, status: u16, etag: Option<&str>, body: &str) {
            self.push_delayed(status, etag, body, None);
        }

        pub(crate) fn push_delayed(
            &self,
            status: u16,
            etag: Option<&str>,
            body: &str,
            delay: Option<Duration>,
        ) {
            self.responses.lock().unwrap().push_back(Scripted {
                response: ApiResponse {
                    status,
                    etag: etag.map(str::to_string),
                    body: body.as_bytes().to_vec(),
                },
                delay,
            });
        }

        pub(crate) fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let scripted = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LibError::message("no scripted response left"))?;
            if let Some(delay) = scripted.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(scripted.response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_for_status_keeps_success_and_maps_failures() {
        let ok = ApiResponse {
            status: 204,
            etag: None,
            body: Vec::new(),
        };
        assert!(ok.error_for_status("http://x").is_ok());

        let missing = ApiResponse {
            status: 404,
            etag: None,
            body: b"no route".to_vec(),
        };
        let err = missing
            .error_for_status("http://x/nodes")
            .expect_err("404 should fail");
        assert!(err.is_not_found());
    }

    #[test]
    fn headers_carry_workspace_and_etag() {
        let request = ApiRequest::get("http://x/nodes")
            .workspace(Some("ws-1"))
            .if_none_match(Some("\"v1\"".to_string()));
        let headers = ReqwestTransport::headers(&request).expect("headers should build");
        assert_eq!(headers.get(WORKSPACE_HEADER).unwrap(), "ws-1");
        assert_eq!(headers.get(IF_NONE_MATCH).unwrap(), "\"v1\"");
    }

    #[test]
    fn invalid_header_values_are_rejected() {
        let request = ApiRequest::get("http://x").workspace(Some("bad\nvalue"));
        let err = ReqwestTransport::headers(&request).expect_err("newline is not allowed");
        assert_eq!(err.public, "Header value contains invalid characters");
    }
}
