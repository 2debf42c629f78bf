//! HTTP transport seam.
//!
//! The client hands fully prepared requests to a [`Transport`] and turns any
//! `Err` into an error document, so implementations only report what went
//! wrong. [`ReqwestTransport`] is the default; any
//! `Fn(String, TransportRequest) -> impl Future<Output = Result<RawResponse>>`
//! closure is a transport too.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tracing::trace;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
  #[default]
  Get,
  Post,
  Patch,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Patch => "PATCH",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Patch => reqwest::Method::PATCH,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A request ready to send: final headers and serialized JSON body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportRequest {
  pub method: Method,
  pub headers: HashMap<String, String>,
  pub body: Option<Value>,
}

/// Status plus decoded JSON body. The body is `Null` when the response had none.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
  pub status: u16,
  pub body: Value,
}

impl RawResponse {
  pub fn new(status: u16, body: Value) -> Self {
    Self { status, body }
  }

  pub fn no_content() -> Self {
    Self {
      status: 204,
      body: Value::Null,
    }
  }
}

pub trait Transport: Send + Sync {
  fn request(&self, url: &str, request: TransportRequest) -> BoxFuture<'static, Result<RawResponse>>;
}

impl<F, Fut> Transport for F
where
  F: Fn(String, TransportRequest) -> Fut + Send + Sync,
  Fut: Future<Output = Result<RawResponse>> + Send + 'static,
{
  fn request(&self, url: &str, request: TransportRequest) -> BoxFuture<'static, Result<RawResponse>> {
    self(url.to_string(), request).boxed()
  }
}

/// Transport backed by a shared `reqwest::Client`
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

impl Transport for ReqwestTransport {
  fn request(&self, url: &str, request: TransportRequest) -> BoxFuture<'static, Result<RawResponse>> {
    let client = self.client.clone();
    let url = url.to_string();

    async move {
      trace!(method = %request.method, url, "sending request");
      let mut builder = client.request(request.method.into(), &url);
      for (name, value) in &request.headers {
        builder = builder.header(name, value);
      }
      if let Some(body) = &request.body {
        let bytes =
          serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
        builder = builder.body(bytes);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;
      let status = response.status().as_u16();
      if status == 204 {
        return Ok(RawResponse::no_content());
      }

      let bytes = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;
      if bytes.is_empty() {
        return Ok(RawResponse::new(status, Value::Null));
      }

      let body = serde_json::from_slice(&bytes)
        .map_err(|e| eyre!("Invalid JSON response from {} ({}): {}", url, status, e))?;
      Ok(RawResponse::new(status, body))
    }
    .boxed()
  }
}
