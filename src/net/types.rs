use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Declared destination of a request, as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  /// No destination (e.g. `fetch()` from page script)
  #[default]
  Empty,
  /// Any other destination (`iframe`, `worker`, `audio`, ...)
  Other(String),
}

impl fmt::Display for Destination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Destination::Other(name) => return f.write_str(name),
      Destination::Document => "document",
      Destination::Script => "script",
      Destination::Style => "style",
      Destination::Image => "image",
      Destination::Font => "font",
      Destination::Manifest => "manifest",
      Destination::Empty => "",
    };
    f.write_str(name)
  }
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "document" => Ok(Destination::Document),
      "script" => Ok(Destination::Script),
      "style" => Ok(Destination::Style),
      "image" => Ok(Destination::Image),
      "font" => Ok(Destination::Font),
      "manifest" => Ok(Destination::Manifest),
      "" | "empty" => Ok(Destination::Empty),
      other if other.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') => {
        Ok(Destination::Other(other.to_string()))
      }
      other => Err(eyre!("Invalid request destination: {}", other)),
    }
  }
}

/// An outgoing GET request seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub url: Url,
  pub destination: Destination,
}

impl Request {
  pub fn new(url: Url, destination: Destination) -> Self {
    Self { url, destination }
  }

  /// Parse an absolute URL into a request with no destination.
  pub fn parse(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL {}: {}", url, e))?;
    Ok(Self::new(url, Destination::Empty))
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  /// Key under which the response for this request is cached.
  ///
  /// Fragments never reach the network, so they are not part of the key.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.into()
  }

  /// Whether this request is a document navigation the worker intercepts.
  pub fn is_document(&self) -> bool {
    let url = self.url.as_str();
    self.destination == Destination::Document || url.contains(".html") || url.ends_with('/')
  }
}

/// A response snapshot. The body is reference counted, so clones are cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      url: url.into(),
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// True for any 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(url: &str, destination: Destination) -> Request {
    Request::parse(url).unwrap().with_destination(destination)
  }

  #[test]
  fn test_document_destination_is_intercepted() {
    assert!(request("https://app.test/about", Destination::Document).is_document());
  }

  #[test]
  fn test_html_suffix_is_intercepted() {
    assert!(request("https://app.test/index.html", Destination::Empty).is_document());
    assert!(request("https://app.test/page.html?x=1", Destination::Empty).is_document());
  }

  #[test]
  fn test_trailing_slash_is_intercepted() {
    assert!(request("https://app.test/", Destination::Empty).is_document());
    assert!(request("https://app.test/docs/", Destination::Empty).is_document());
  }

  #[test]
  fn test_subresources_pass_through() {
    assert!(!request("https://app.test/icon-192.svg", Destination::Image).is_document());
    assert!(!request("https://app.test/app.js", Destination::Script).is_document());
    assert!(!request("https://app.test/manifest.json", Destination::Manifest).is_document());
  }

  #[test]
  fn test_other_destinations_pass_through() {
    let frame = "iframe".parse::<Destination>().unwrap();
    assert!(!request("https://app.test/embed", frame.clone()).is_document());
    assert!(request("https://app.test/embed.html", frame).is_document());
  }

  #[test]
  fn test_cache_key_drops_fragment() {
    let req = request("https://app.test/index.html#settings", Destination::Document);
    assert_eq!(req.cache_key(), "https://app.test/index.html");
  }

  #[test]
  fn test_destination_from_str() {
    assert_eq!("Document".parse::<Destination>().unwrap(), Destination::Document);
    assert_eq!("".parse::<Destination>().unwrap(), Destination::Empty);
    assert_eq!(
      "iframe".parse::<Destination>().unwrap(),
      Destination::Other("iframe".to_string())
    );
    assert_eq!("Audio".parse::<Destination>().unwrap().to_string(), "audio");
    assert!("not a destination".parse::<Destination>().is_err());
  }

  #[test]
  fn test_response_status_and_headers() {
    let resp = Response::new("https://app.test/", 204, "").with_header("Content-Type", "text/html");
    assert!(resp.is_ok());
    assert_eq!(resp.header("content-type"), Some("text/html"));
    assert!(!Response::new("https://app.test/", 404, "").is_ok());
  }
}
