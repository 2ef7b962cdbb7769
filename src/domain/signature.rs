//! Request signatures: every attribute that determines a thumbnail and its cache identity.

use std::num::ParseIntError;

use thiserror::Error;
use url::Url;

pub const DEFAULT_OFFSET_SECS: u64 = 300;
pub const DEFAULT_LENGTH_SECS: u64 = 0;
pub const DEFAULT_FORMAT: &str = "webp";
pub const DEFAULT_WIDTH: u32 = 0;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("no source url was supplied")]
    MissingSource,
    #[error("failed to parse source url `{value}`")]
    InvalidSource {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to parse {field} `{value}`")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Content-addressed identity of the source: torrent info hash plus the file path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentIdentity {
    info_hash: String,
    path: String,
}

impl ContentIdentity {
    /// Both halves must be non-empty, otherwise the source is identified by its url alone.
    pub fn from_parts(info_hash: &str, path: &str) -> Option<Self> {
        let info_hash = info_hash.trim();
        let path = path.trim();
        if info_hash.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            info_hash: info_hash.to_string(),
            path: path.to_string(),
        })
    }

    pub fn info_hash(&self) -> &str {
        &self.info_hash
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Immutable description of one requested thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature {
    source: Url,
    offset_secs: u64,
    length_secs: u64,
    format: String,
    width: u32,
    identity: Option<ContentIdentity>,
}

impl RequestSignature {
    /// Signature with default offset, length, format and width.
    pub fn new(source: Url) -> Self {
        Self {
            source,
            offset_secs: DEFAULT_OFFSET_SECS,
            length_secs: DEFAULT_LENGTH_SECS,
            format: DEFAULT_FORMAT.to_string(),
            width: DEFAULT_WIDTH,
            identity: None,
        }
    }

    pub fn with_offset_secs(mut self, offset_secs: u64) -> Self {
        self.offset_secs = offset_secs;
        self
    }

    pub fn with_length_secs(mut self, length_secs: u64) -> Self {
        self.length_secs = length_secs;
        self
    }

    /// Formats are case-insensitive; an empty value keeps the default.
    pub fn with_format(mut self, format: &str) -> Self {
        let format = format.trim();
        if !format.is_empty() {
            self.format = format.to_ascii_lowercase();
        }
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn with_identity(mut self, identity: Option<ContentIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn offset_secs(&self) -> u64 {
        self.offset_secs
    }

    pub fn length_secs(&self) -> u64 {
        self.length_secs
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn identity(&self) -> Option<&ContentIdentity> {
        self.identity.as_ref()
    }
}

/// Parse and re-serialise a source locator so equivalent spellings compare equal.
pub fn parse_source(value: &str) -> Result<Url, SignatureError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SignatureError::MissingSource);
    }
    Url::parse(value).map_err(|source| SignatureError::InvalidSource {
        value: value.to_string(),
        source,
    })
}

/// Parse an optional whole-second value, falling back to `default` when absent or blank.
pub fn parse_seconds(
    field: &'static str,
    value: Option<&str>,
    default: u64,
) -> Result<u64, SignatureError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map_err(|source| SignatureError::InvalidNumber {
                field,
                value: value.to_string(),
                source,
            }),
    }
}

/// Parse an optional output width; `0` keeps the source width.
pub fn parse_width(value: Option<&str>) -> Result<u32, SignatureError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(DEFAULT_WIDTH),
        Some(value) => value
            .parse::<u32>()
            .map_err(|source| SignatureError::InvalidNumber {
                field: "width",
                value: value.to_string(),
                source,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_sources_normalise_identically() {
        let lower = parse_source("http://example.com/a/../video.mp4").expect("valid url");
        let upper = parse_source("HTTP://EXAMPLE.com:80/video.mp4").expect("valid url");
        assert_eq!(lower, upper);
        assert_eq!(lower.as_str(), "http://example.com/video.mp4");
    }

    #[test]
    fn blank_source_is_missing() {
        assert!(matches!(
            parse_source("   "),
            Err(SignatureError::MissingSource)
        ));
    }

    #[test]
    fn relative_source_is_rejected() {
        assert!(matches!(
            parse_source("videos/clip.mp4"),
            Err(SignatureError::InvalidSource { .. })
        ));
    }

    #[test]
    fn seconds_default_when_absent() {
        assert_eq!(parse_seconds("offset", None, 300).expect("default"), 300);
        assert_eq!(parse_seconds("offset", Some(""), 300).expect("default"), 300);
        assert_eq!(parse_seconds("length", Some("12"), 0).expect("parsed"), 12);
    }

    #[test]
    fn negative_seconds_are_rejected() {
        let err = parse_seconds("offset", Some("-5"), 300).expect_err("negative offset");
        assert!(matches!(
            err,
            SignatureError::InvalidNumber {
                field: "offset",
                ..
            }
        ));
    }

    #[test]
    fn identity_requires_both_parts() {
        assert!(ContentIdentity::from_parts("abc", "").is_none());
        assert!(ContentIdentity::from_parts("", "movie.mkv").is_none());
        let identity = ContentIdentity::from_parts("abc", "movie.mkv").expect("identity");
        assert_eq!(identity.info_hash(), "abc");
        assert_eq!(identity.path(), "movie.mkv");
    }

    #[test]
    fn format_is_lowercased_and_blank_keeps_default() {
        let source = parse_source("http://example.com/video.mp4").expect("valid url");
        let signature = RequestSignature::new(source.clone()).with_format("WebP");
        assert_eq!(signature.format(), "webp");

        let signature = RequestSignature::new(source).with_format(" ");
        assert_eq!(signature.format(), DEFAULT_FORMAT);
    }
}
