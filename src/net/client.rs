use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use super::types::{Request, Response};

/// Network seam used by the worker.
///
/// A resolved `Ok` carries any status code; only transport failures
/// (offline, DNS, refused connection) are errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// HTTP network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-worker/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.clone();

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    Ok(Response {
      url: final_url,
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Destination;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn request_for(server: &MockServer, route: &str) -> Request {
    Request::parse(&format!("{}{}", server.uri(), route))
      .unwrap()
      .with_destination(Destination::Document)
  }

  #[tokio::test]
  async fn test_fetch_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/index.html"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw("<html>hello</html>", "text/html")
          .insert_header("x-build", "42"),
      )
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let response = network
      .fetch(&request_for(&server, "/index.html"))
      .await
      .expect("fetch failed");

    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), b"<html>hello</html>");
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("X-Build"), Some("42"));
    assert!(response.url.ends_with("/index.html"));
  }

  #[tokio::test]
  async fn test_fetch_non_success_status_is_not_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/missing.html"))
      .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let response = network
      .fetch(&request_for(&server, "/missing.html"))
      .await
      .expect("fetch failed");

    assert_eq!(response.status, 404);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_fetch_connection_failure_is_an_error() {
    // Bind and drop a listener so the port is known to be closed
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let network = HttpNetwork::new().unwrap();
    let request = Request::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();

    assert!(network.fetch(&request).await.is_err());
  }
}
