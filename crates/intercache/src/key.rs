//! # Cache Keys
//!
//! Maps a [`RequestDescriptor`] to a stable [`CacheKey`]. Paths and query
//! parameters are percent-decoded and re-encoded one way, and query pairs are
//! sorted, so cosmetic differences between equivalent URLs never produce
//! distinct keys. Fragments are ignored.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use url::form_urlencoded;

use crate::request::RequestDescriptor;

/// Opaque identifier of a cached response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed-width, filename-safe name for this key.
    pub fn storage_name(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        format!("{hash:x}")
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds cache keys from request descriptors
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyBuilder {
    include_origin: bool,
}

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also key on scheme, host and port. Off by default, in which case the
    /// same path on two hosts shares an entry.
    pub fn with_origin(mut self, include_origin: bool) -> Self {
        self.include_origin = include_origin;
        self
    }

    pub fn build(&self, request: &RequestDescriptor) -> CacheKey {
        let url_only = request.method.keys_on_url_alone();
        let mut key = String::with_capacity(request.url.as_str().len() + 16);

        if !url_only {
            key.push_str(request.method.as_str());
            key.push(' ');
        }

        if self.include_origin {
            key.push_str(&request.url.origin().ascii_serialization());
        }

        key.push_str(&canonical_path(&request.url));

        let query = canonical_query(&request.url);
        if !query.is_empty() {
            key.push('?');
            key.push_str(&query);
        }

        if !url_only {
            let body = request.body.as_deref().unwrap_or_default();
            key.push_str("#body=");
            key.push_str(&hex::encode(Sha256::digest(body)));
        }

        CacheKey(key)
    }
}

fn canonical_path(url: &Url) -> String {
    let Some(segments) = url.path_segments() else {
        // cannot-be-a-base URLs such as `data:` carry an opaque path
        return url.path().to_string();
    };

    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.extend(form_urlencoded::byte_serialize(&urlencoding::decode_binary(
            segment.as_bytes(),
        )));
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, ResourceKind};

    fn get(url: &str) -> RequestDescriptor {
        RequestDescriptor::parse(Method::Get, url, ResourceKind::XhrFetch).unwrap()
    }

    fn post(url: &str, body: &'static [u8]) -> RequestDescriptor {
        RequestDescriptor::parse(Method::Post, url, ResourceKind::XhrFetch)
            .unwrap()
            .with_body(body)
    }

    #[test]
    fn test_query_order_is_irrelevant() {
        let builder = CacheKeyBuilder::new();
        let a = builder.build(&get("http://localhost/a?x=1&y=2"));
        let b = builder.build(&get("http://localhost/a?y=2&x=1"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_equivalent_encodings_collide() {
        let builder = CacheKeyBuilder::new();
        let a = builder.build(&get("http://localhost/img%20dir/a%7E.png?q=hello%20world"));
        let b = builder.build(&get("http://localhost/img%20dir/a~.png?q=hello+world"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fragment_ignored() {
        let builder = CacheKeyBuilder::new();
        let a = builder.build(&get("http://localhost/a?x=1#top"));
        let b = builder.build(&get("http://localhost/a?x=1"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_values_differ() {
        let builder = CacheKeyBuilder::new();
        let a = builder.build(&get("http://localhost/a?x=1"));
        let b = builder.build(&get("http://localhost/a?x=2"));
        let c = builder.build(&get("http://localhost/b?x=1"));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_duplicate_params_are_kept() {
        let builder = CacheKeyBuilder::new();
        let a = builder.build(&get("http://localhost/a?x=1&x=2"));
        let b = builder.build(&get("http://localhost/a?x=2&x=1"));
        let c = builder.build(&get("http://localhost/a?x=1"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_body_digest_separates_posts() {
        let builder = CacheKeyBuilder::new();
        let a = builder.build(&post("http://localhost/api", b"{\"page\":1}"));
        let b = builder.build(&post("http://localhost/api", b"{\"page\":2}"));
        let a_again = builder.build(&post("http://localhost/api", b"{\"page\":1}"));
        assert_ne!(a, b);
        assert_eq!(a, a_again);
        assert!(a.as_str().starts_with("POST /api#body="));
    }

    #[test]
    fn test_post_never_collides_with_get() {
        let builder = CacheKeyBuilder::new();
        let a = builder.build(&get("http://localhost/api"));
        let b = builder.build(&post("http://localhost/api", b""));
        assert_ne!(a, b);
    }

    #[test]
    fn test_origin_is_optional() {
        let plain = CacheKeyBuilder::new();
        let with_origin = CacheKeyBuilder::new().with_origin(true);
        let a = get("http://one.example/a");
        let b = get("http://two.example/a");
        assert_eq!(plain.build(&a), plain.build(&b));
        assert_ne!(with_origin.build(&a), with_origin.build(&b));
        assert_eq!(with_origin.build(&a).as_str(), "http://one.example/a");
    }

    #[test]
    fn test_storage_name_is_fixed_width_hex() {
        let builder = CacheKeyBuilder::new();
        let key = builder.build(&get("http://localhost/../../etc/passwd?x=/../../"));
        let name = key.storage_name();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_malformed_escapes_are_kept_literally() {
        let builder = CacheKeyBuilder::new();
        let raw = builder.build(&get("http://localhost/a%zz/b%41"));
        let escaped = builder.build(&get("http://localhost/a%25zz/bA"));
        assert_eq!(raw, escaped);
        assert_eq!(raw.as_str(), "/a%25zz/bA");
    }

    #[test]
    fn test_head_never_shares_a_get_key() {
        let builder = CacheKeyBuilder::new();
        let head =
            RequestDescriptor::parse(Method::Head, "http://localhost/api/data", ResourceKind::XhrFetch)
                .unwrap();
        let head_key = builder.build(&head);
        assert_ne!(head_key, builder.build(&get("http://localhost/api/data")));
        assert!(head_key.as_str().starts_with("HEAD "));
    }
}
