//! File references and materialization
//!
//! Resolves a file reference to a form the transport can carry: inline
//! bytes become a `base64://` data string, and references the platform can
//! already use (URLs with network fetch disabled, encoded strings, opaque
//! platform file ids) pass through unchanged.

use crate::error::{Error, Result};
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of an inline encoded payload
pub const BASE64_PREFIX: &str = "base64://";

/// Default size ceiling (10 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 10_485_760;

/// A reference to file content
#[derive(Debug, Clone, PartialEq)]
pub enum FileRef {
    /// In-memory content
    Bytes(Bytes),
    /// Filesystem path that must be readable
    Path(PathBuf),
    /// Absolute http(s) URL
    Url(String),
    /// Encoded payload, local path, or opaque platform reference
    Reference(String),
}

impl FileRef {
    /// Classify a string reference
    pub fn parse(reference: &str) -> Self {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            FileRef::Url(reference.to_string())
        } else if let Some(path) = reference.strip_prefix("file://") {
            FileRef::Path(PathBuf::from(path))
        } else {
            FileRef::Reference(reference.to_string())
        }
    }

    /// Read a reference out of a segment's `file` field
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::parse(s)),
            Value::Array(items) => items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(|bytes| FileRef::Bytes(Bytes::from(bytes))),
            _ => None,
        }
    }

    /// String form used on the wire
    pub fn to_wire_string(&self) -> String {
        match self {
            FileRef::Bytes(bytes) => encode(bytes),
            FileRef::Path(path) => format!("file://{}", path.display()),
            FileRef::Url(url) => url.clone(),
            FileRef::Reference(reference) => reference.clone(),
        }
    }
}

impl From<Bytes> for FileRef {
    fn from(bytes: Bytes) -> Self {
        FileRef::Bytes(bytes)
    }
}

impl From<Vec<u8>> for FileRef {
    fn from(bytes: Vec<u8>) -> Self {
        FileRef::Bytes(Bytes::from(bytes))
    }
}

impl From<&Path> for FileRef {
    fn from(path: &Path) -> Self {
        FileRef::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for FileRef {
    fn from(path: PathBuf) -> Self {
        FileRef::Path(path)
    }
}

impl From<&str> for FileRef {
    fn from(reference: &str) -> Self {
        FileRef::parse(reference)
    }
}

/// Encode bytes as a `base64://` data string
pub fn encode(bytes: &[u8]) -> String {
    format!(
        "{}{}",
        BASE64_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// File materialization options
#[derive(Debug, Clone)]
pub struct FileOptions {
    /// Whether http(s) URLs may be downloaded
    pub allow_network_fetch: bool,
    /// Hard ceiling on resolved content size
    pub max_bytes: u64,
    /// Timeout for a single download
    pub fetch_timeout: Duration,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            allow_network_fetch: true,
            max_bytes: DEFAULT_MAX_BYTES,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Resolves file references to transport-ready strings
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    options: FileOptions,
    http: reqwest::Client,
}

impl FileMaterializer {
    /// Create a materializer with the given options
    pub fn new(options: FileOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.fetch_timeout)
            .build()?;
        Ok(Self { options, http })
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    /// Resolve `file` to its transport-ready form
    pub async fn materialize(&self, file: &FileRef) -> Result<String> {
        match self.fetch(file).await? {
            Some(bytes) => Ok(encode(&bytes)),
            None => Ok(file.to_wire_string()),
        }
    }

    /// Resolve `file` to raw bytes, enforcing the size ceiling.
    ///
    /// Returns `None` when the reference is already usable as-is and should
    /// pass through untouched.
    pub async fn fetch(&self, file: &FileRef) -> Result<Option<Bytes>> {
        match file {
            FileRef::Bytes(bytes) => {
                self.check_size(bytes.len() as u64)?;
                Ok(Some(bytes.clone()))
            }
            FileRef::Path(path) => self.read_file(path).await.map(Some),
            FileRef::Url(url) if self.options.allow_network_fetch => {
                self.download(url).await.map(Some)
            }
            FileRef::Url(_) => Ok(None),
            FileRef::Reference(reference) => {
                if let Some(payload) = reference.strip_prefix(BASE64_PREFIX) {
                    self.check_size(decoded_len(payload))?;
                    return Ok(None);
                }
                // Local paths are read; anything else is a platform reference
                match tokio::fs::metadata(reference).await {
                    Ok(meta) if meta.is_file() => self.read_file(Path::new(reference)).await.map(Some),
                    _ => Ok(None),
                }
            }
        }
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.options.max_bytes {
            return Err(Error::PayloadTooLarge {
                size,
                max: self.options.max_bytes,
            });
        }
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            Error::Fetch(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.check_size(meta.len())?;

        let content = tokio::fs::read(path).await.map_err(|e| {
            Error::Fetch(format!("Failed to read {}: {}", path.display(), e))
        })?;
        // The file may have grown between stat and read
        self.check_size(content.len() as u64)?;
        Ok(Bytes::from(content))
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "Failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }
        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::Fetch(format!("Failed to fetch {}: {}", url, e)))?;
            self.check_size((body.len() + chunk.len()) as u64)?;
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, size = body.len(), "Fetched file");
        Ok(body.freeze())
    }
}

/// Decoded size of a base64 payload, without decoding it
fn decoded_len(payload: &str) -> u64 {
    let payload = payload.trim_end();
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    ((payload.len() as u64 * 3) / 4).saturating_sub(padding as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn materializer(max_bytes: u64, allow_network_fetch: bool) -> FileMaterializer {
        FileMaterializer::new(FileOptions {
            allow_network_fetch,
            max_bytes,
            ..FileOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(
            FileRef::parse("https://example.com/a.png"),
            FileRef::Url("https://example.com/a.png".into())
        );
        assert_eq!(
            FileRef::parse("file:///tmp/a.png"),
            FileRef::Path(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(
            FileRef::parse("base64://AAAA"),
            FileRef::Reference("base64://AAAA".into())
        );
    }

    #[test]
    fn test_from_byte_array_value() {
        let file = FileRef::from_value(&serde_json::json!([104, 105])).unwrap();
        assert_eq!(file, FileRef::Bytes(Bytes::from_static(b"hi")));
        assert!(FileRef::from_value(&serde_json::json!([300])).is_none());
    }

    #[tokio::test]
    async fn test_bytes_are_encoded() {
        let m = materializer(DEFAULT_MAX_BYTES, true);
        let encoded = m.materialize(&FileRef::from(b"hello".to_vec())).await.unwrap();

        assert_eq!(encoded, "base64://aGVsbG8=");
    }

    #[tokio::test]
    async fn test_oversize_bytes_rejected() {
        let m = materializer(4, true);
        let err = m
            .materialize(&FileRef::from(b"hello".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PayloadTooLarge { size: 5, max: 4 }));
    }

    #[tokio::test]
    async fn test_file_path_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let m = materializer(DEFAULT_MAX_BYTES, true);
        let encoded = m.materialize(&FileRef::from(file.path())).await.unwrap();
        assert_eq!(encoded, "base64://aGVsbG8=");

        // Bare local paths are read as well
        let reference = FileRef::parse(file.path().to_str().unwrap());
        assert_eq!(m.materialize(&reference).await.unwrap(), "base64://aGVsbG8=");
    }

    #[tokio::test]
    async fn test_oversize_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 16]).unwrap();

        let m = materializer(8, true);
        let err = m.materialize(&FileRef::from(file.path())).await.unwrap_err();
        assert_eq!(err.kind(), "PayloadTooLarge");
    }

    #[tokio::test]
    async fn test_missing_path_is_fetch_error() {
        let m = materializer(DEFAULT_MAX_BYTES, true);
        let err = m
            .materialize(&FileRef::parse("file:///definitely/not/here.png"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "FetchError");
    }

    #[tokio::test]
    async fn test_passthrough_references() {
        let m = materializer(DEFAULT_MAX_BYTES, false);

        let url = FileRef::parse("https://example.com/a.png");
        assert_eq!(m.materialize(&url).await.unwrap(), "https://example.com/a.png");

        let encoded = FileRef::parse("base64://AAAA");
        assert_eq!(m.materialize(&encoded).await.unwrap(), "base64://AAAA");

        let platform_id = FileRef::parse("abc123.image");
        assert_eq!(m.materialize(&platform_id).await.unwrap(), "abc123.image");
    }

    #[tokio::test]
    async fn test_oversize_base64_reference_rejected() {
        let m = materializer(4, false);

        // "hello" is five bytes once decoded
        let err = m
            .materialize(&FileRef::parse("base64://aGVsbG8="))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { size: 5, max: 4 }));

        // "hell" fits exactly
        let fits = FileRef::parse("base64://aGVsbA==");
        assert_eq!(m.materialize(&fits).await.unwrap(), "base64://aGVsbA==");
    }

    #[test]
    fn test_decoded_len() {
        assert_eq!(decoded_len(""), 0);
        assert_eq!(decoded_len("AAAA"), 3);
        assert_eq!(decoded_len("aGVsbG8="), 5);
        assert_eq!(decoded_len("aGVsbA=="), 4);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_fetch_error() {
        let m = materializer(DEFAULT_MAX_BYTES, true);
        let err = m
            .materialize(&FileRef::parse("http://127.0.0.1:9/missing.png"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "FetchError");
    }
}
