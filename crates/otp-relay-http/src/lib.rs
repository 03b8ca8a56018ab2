//! reqwest adapter for the core HTTP port.
//!
//! One request per call; redirects are surfaced to the caller, which applies
//! the same-origin policy itself.

use std::time::Duration;

use async_trait::async_trait;
use otp_relay_core::{
    errors::Error,
    transport::{HttpRequest, HttpResponse, HttpTransport, Method},
    Result,
};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("http client build error: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, req: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match req.method {
            Method::Get => self.http.get(req.url.clone()),
            Method::Post => self.http.post(req.url.clone()),
        };
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(form) = &req.form {
            builder = builder.form(form);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("request to {} failed: {e}", req.url.path())))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("reading response body failed: {e}")))?;

        debug!(
            category = "HTTP",
            path = req.url.path(),
            status,
            bytes = body.len(),
            "response received"
        );
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
