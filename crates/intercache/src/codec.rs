//! # Content Codec
//!
//! Decides how a response body is persisted and replayed. Bodies are never
//! rewritten: text and JSON are validated on the way in and on the way out,
//! and anything that fails validation is demoted to an opaque binary body so
//! that `decode(encode(x)) == x` holds for every input.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::request::{Headers, ResourceKind};

/// How a cached body is stored and reconstituted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMode {
    /// UTF-8 text
    Text,
    /// JSON document
    Structured,
    /// Opaque bytes
    Binary,
}

/// A body ready to be handed to the stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    /// Mode the body was actually stored under, which may be weaker than the
    /// requested one
    pub mode: BodyMode,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentCodec;

impl ContentCodec {
    /// Pick a body mode from the response headers and the request's resource
    /// classification. Missing or unrecognised content types are binary.
    pub fn decide_mode(headers: &Headers, hint: ResourceKind) -> BodyMode {
        if matches!(
            hint,
            ResourceKind::Image | ResourceKind::Font | ResourceKind::Media
        ) {
            return BodyMode::Binary;
        }

        let Some(content_type) = headers.get("content-type") else {
            return BodyMode::Binary;
        };
        let (essence, charset) = parse_content_type(content_type);

        if let Some(charset) = charset {
            if !matches!(charset.as_str(), "utf-8" | "utf8" | "us-ascii") {
                return BodyMode::Binary;
            }
        }

        if essence == "application/json" || essence.ends_with("+json") {
            BodyMode::Structured
        } else if essence.starts_with("text/")
            || essence.ends_with("+xml")
            || matches!(
                essence.as_str(),
                "application/javascript"
                    | "application/ecmascript"
                    | "application/xml"
                    | "application/x-www-form-urlencoded"
            )
        {
            BodyMode::Text
        } else {
            BodyMode::Binary
        }
    }

    /// Validate `raw` for `mode`, demoting it when it does not fit.
    pub fn encode(mode: BodyMode, raw: Bytes) -> EncodedBody {
        let mode = match mode {
            BodyMode::Structured if serde_json::from_slice::<serde::de::IgnoredAny>(&raw).is_ok() => {
                BodyMode::Structured
            }
            BodyMode::Structured | BodyMode::Text if std::str::from_utf8(&raw).is_ok() => {
                BodyMode::Text
            }
            BodyMode::Binary => BodyMode::Binary,
            requested => {
                debug!(
                    requested = ?requested,
                    len = raw.len(),
                    "Body does not validate for its content type, storing as binary"
                );
                BodyMode::Binary
            }
        };
        EncodedBody { mode, bytes: raw }
    }

    /// Reconstitute a stored body. Fails when the bytes no longer validate
    /// under the recorded mode.
    pub fn decode(mode: BodyMode, stored: Bytes) -> CacheResult<Bytes> {
        match mode {
            BodyMode::Binary => Ok(stored),
            BodyMode::Text => {
                std::str::from_utf8(&stored)
                    .map_err(|e| CacheError::Decode(format!("stored text is not UTF-8: {e}")))?;
                Ok(stored)
            }
            BodyMode::Structured => {
                serde_json::from_slice::<serde::de::IgnoredAny>(&stored)
                    .map_err(|e| CacheError::Decode(format!("stored JSON is invalid: {e}")))?;
                Ok(stored)
            }
        }
    }

    /// Headers to serve alongside a replayed body.
    pub fn replay_headers(
        stored: &Headers,
        content_type: Option<&str>,
        url: &Url,
        body_len: usize,
    ) -> Headers {
        let mut headers = stored.clone();
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| infer_content_type(url).to_string());
        headers.insert("content-type".to_string(), content_type);
        headers.insert("content-length".to_string(), body_len.to_string());
        headers
    }
}

/// Split a content type into its lower-cased essence and optional charset.
fn parse_content_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    });
    (essence, charset)
}

/// Guess a content type from the extension of the URL path.
pub fn infer_content_type(url: &Url) -> &'static str {
    let extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "json" => "application/json",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::normalize_headers;
    use sha2::{Digest, Sha256};

    fn headers(content_type: &str) -> Headers {
        normalize_headers([("Content-Type", content_type)])
    }

    // Deterministic noise: a SHA-256 chain over a counter.
    fn noise(len: usize) -> Bytes {
        let mut out = Vec::with_capacity(len + 32);
        let mut counter = 0u64;
        while out.len() < len {
            out.extend_from_slice(&Sha256::digest(counter.to_le_bytes()));
            counter += 1;
        }
        out.truncate(len);
        Bytes::from(out)
    }

    #[test]
    fn test_decide_mode() {
        let hint = ResourceKind::XhrFetch;
        assert_eq!(ContentCodec::decide_mode(&headers("text/plain"), hint), BodyMode::Text);
        assert_eq!(
            ContentCodec::decide_mode(&headers("application/json; charset=utf-8"), hint),
            BodyMode::Structured
        );
        assert_eq!(
            ContentCodec::decide_mode(&headers("application/problem+json"), hint),
            BodyMode::Structured
        );
        assert_eq!(
            ContentCodec::decide_mode(&headers("image/png"), hint),
            BodyMode::Binary
        );
        assert_eq!(
            ContentCodec::decide_mode(&headers("application/x-unknown"), hint),
            BodyMode::Binary
        );
        assert_eq!(ContentCodec::decide_mode(&Headers::new(), hint), BodyMode::Binary);
    }

    #[test]
    fn test_decide_mode_respects_charset_and_hint() {
        assert_eq!(
            ContentCodec::decide_mode(
                &headers("text/html; charset=\"ISO-8859-1\""),
                ResourceKind::Document
            ),
            BodyMode::Binary
        );
        assert_eq!(
            ContentCodec::decide_mode(&headers("text/plain"), ResourceKind::Image),
            BodyMode::Binary
        );
    }

    #[test]
    fn test_text_round_trip() {
        let raw = Bytes::from_static("héllo wörld\n".as_bytes());
        let encoded = ContentCodec::encode(BodyMode::Text, raw.clone());
        assert_eq!(encoded.mode, BodyMode::Text);
        assert_eq!(ContentCodec::decode(encoded.mode, encoded.bytes).unwrap(), raw);
    }

    #[test]
    fn test_structured_keeps_exact_bytes() {
        let raw = Bytes::from_static(b"{ \"a\" :  [1, 2,3] }\n");
        let encoded = ContentCodec::encode(BodyMode::Structured, raw.clone());
        assert_eq!(encoded.mode, BodyMode::Structured);
        assert_eq!(ContentCodec::decode(encoded.mode, encoded.bytes).unwrap(), raw);
    }

    #[test]
    fn test_invalid_json_is_demoted() {
        let raw = Bytes::from_static(b"{not json");
        let encoded = ContentCodec::encode(BodyMode::Structured, raw.clone());
        assert_eq!(encoded.mode, BodyMode::Text);
        assert_eq!(ContentCodec::decode(encoded.mode, encoded.bytes).unwrap(), raw);
    }

    #[test]
    fn test_invalid_utf8_is_demoted() {
        let raw = Bytes::from_static(&[0xff, 0xfe, 0x00, 0x80]);
        for mode in [BodyMode::Text, BodyMode::Structured] {
            let encoded = ContentCodec::encode(mode, raw.clone());
            assert_eq!(encoded.mode, BodyMode::Binary);
            assert_eq!(ContentCodec::decode(encoded.mode, encoded.bytes).unwrap(), raw);
        }
    }

    #[test]
    fn test_binary_png_round_trip() {
        let raw = noise(10_000);
        let mode = ContentCodec::decide_mode(&headers("image/png"), ResourceKind::Image);
        let encoded = ContentCodec::encode(mode, raw.clone());
        assert_eq!(encoded.mode, BodyMode::Binary);
        let decoded = ContentCodec::decode(encoded.mode, encoded.bytes).unwrap();
        assert_eq!(decoded.len(), 10_000);
        assert_eq!(decoded, raw);
    }

    #[test]
    fn test_decode_rejects_corrupt_text() {
        let err = ContentCodec::decode(BodyMode::Text, Bytes::from_static(&[0xc3])).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
        let err =
            ContentCodec::decode(BodyMode::Structured, Bytes::from_static(b"[1,")).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[test]
    fn test_replay_headers_infers_content_type() {
        let url = Url::parse("http://localhost/images/logo.PNG?v=2").unwrap();
        let replay = ContentCodec::replay_headers(&Headers::new(), None, &url, 7);
        assert_eq!(replay.get("content-type").unwrap(), "image/png");
        assert_eq!(replay.get("content-length").unwrap(), "7");

        let replay = ContentCodec::replay_headers(&Headers::new(), Some("text/plain"), &url, 0);
        assert_eq!(replay.get("content-type").unwrap(), "text/plain");

        let bare = Url::parse("http://localhost/download").unwrap();
        assert_eq!(infer_content_type(&bare), "application/octet-stream");
    }
}
