//! # Request and Response Descriptors
//!
//! Immutable views of the traffic the host hands to the engine. The engine
//! never owns the underlying request; it only reads these descriptors.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::PassThrough;

/// Response headers keyed by lower-cased name.
pub type Headers = BTreeMap<String, String>;

/// Headers that describe the connection or the wire framing of a body rather
/// than the body itself. They are never persisted.
const UNSTORED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "set-cookie",
    "proxy-authenticate",
    "upgrade",
];

/// Lower-case header names, joining repeated names with `", "`.
pub fn normalize_headers<I, K, V>(headers: I) -> Headers
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut out = Headers::new();
    for (name, value) in headers {
        let name = name.as_ref().trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.into();
        out.entry(name)
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

/// Subset of `headers` that is safe to replay from the cache.
pub fn storable_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| !UNSTORED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// HTTP method of an outbound request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Other(m) => m,
        }
    }

    /// Only GET is keyed on the URL alone; everything else also folds in the
    /// method and a digest of the request body.
    pub fn keys_on_url_alone(&self) -> bool {
        matches!(self, Method::Get)
    }

    /// HEAD responses carry no body and are never stored.
    pub fn has_response_body(&self) -> bool {
        !matches!(self, Method::Head)
    }
}

impl FromStr for Method {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Ok(match upper.as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            _ => Method::Other(upper),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of the resource a request is fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Top-level navigation
    Document,
    /// Embedded frame navigation
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Media,
    /// XMLHttpRequest or fetch() traffic
    XhrFetch,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::SubFrame => "sub-frame",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::Script => "script",
            ResourceKind::Image => "image",
            ResourceKind::Font => "font",
            ResourceKind::Media => "media",
            ResourceKind::XhrFetch => "xhr-fetch",
            ResourceKind::Other => "other",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = Infallible;

    /// Accepts both our own spellings and the resource type names browser
    /// shells report (`mainFrame`, `xhr`, ...). Unknown names map to `Other`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Ok(match folded.as_str() {
            "document" | "mainframe" => ResourceKind::Document,
            "subframe" | "frame" | "iframe" => ResourceKind::SubFrame,
            "stylesheet" | "css" => ResourceKind::Stylesheet,
            "script" => ResourceKind::Script,
            "image" | "img" => ResourceKind::Image,
            "font" => ResourceKind::Font,
            "media" => ResourceKind::Media,
            "xhr" | "fetch" | "xhrfetch" | "xmlhttprequest" => ResourceKind::XhrFetch,
            _ => ResourceKind::Other,
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request as seen by the interception hook
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub url: Url,
    pub method: Method,
    pub kind: ResourceKind,
    /// Request payload for non-GET methods
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: Url, kind: ResourceKind) -> Self {
        Self {
            url,
            method,
            kind,
            body: None,
        }
    }

    pub fn get(url: Url, kind: ResourceKind) -> Self {
        Self::new(Method::Get, url, kind)
    }

    pub fn parse(method: Method, url: &str, kind: ResourceKind) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, Url::parse(url)?, kind))
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A completed response reported back by the host
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    /// The ticket `intercept` returned for the originating request
    pub pass: PassThrough,
    /// Final URL of the response
    pub url: Url,
    pub status: u16,
    pub headers: Headers,
    /// Fully read, already content-decoded body
    pub body: Bytes,
}

impl ResponseDescriptor {
    pub fn new(pass: PassThrough, url: Url, status: u16) -> Self {
        Self {
            pass,
            url,
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().trim().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.headers.extend(normalize_headers(headers));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}
