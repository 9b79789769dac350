//! Managed file entity: one file through its upload/delete lifecycle.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;

use crate::digest::{file_extension, generate_name, sha256_hex};
use crate::error::FileError;

/// Prefix of an embedded type marker (`data:<mime>[;params],<payload>`).
const TYPE_MARKER_PREFIX: &[u8] = b"data:";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Loaded,
    Uploading,
    Uploaded,
    Deleting,
    Deleted,
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FileStatus::Loaded => write!(f, "loaded"),
            FileStatus::Uploading => write!(f, "uploading"),
            FileStatus::Uploaded => write!(f, "uploaded"),
            FileStatus::Deleting => write!(f, "deleting"),
            FileStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Raw input handed over by a source provider: bytes, the original file name and,
/// when the provider knows them, the declared size and MIME type.
#[derive(Debug, Clone)]
pub struct RawSource {
    pub bytes: Bytes,
    pub original_name: String,
    pub declared_size: Option<u64>,
    pub declared_mime_type: Option<String>,
}

impl RawSource {
    pub fn new(bytes: impl Into<Bytes>, original_name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            original_name: original_name.into(),
            declared_size: None,
            declared_mime_type: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.declared_mime_type = Some(mime_type.into());
        self
    }

    /// Read a source from the local filesystem. Read failures are returned as-is.
    ///
    /// The MIME type is sniffed from the leading bytes of known image formats; other
    /// content is left untyped.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = bytes.len() as u64;
        let sniffed = sniff_mime_type(&bytes);

        let source = Self::new(bytes, original_name).with_size(size);
        Ok(match sniffed {
            Some(mime) => source.with_mime_type(mime),
            None => source,
        })
    }
}

/// MIME type of `bytes` when they start with a recognised image signature.
fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// One file under management.
///
/// Transfer state (`status`, `uploaded_bytes`, `uploaded_percentage`, `path`, `uri`) only
/// changes through the transition methods at the bottom of this impl, which the transfer
/// service drives. Everything else is caller-owned.
#[derive(Debug, Clone, Serialize)]
pub struct ManagedFile {
    name: String,
    original_name: String,
    mime_type: Option<String>,
    path: Option<String>,
    uri: Option<String>,
    size: u64,
    public: bool,
    temporary: bool,
    storage_class: Option<String>,
    status: FileStatus,
    uploaded_bytes: u64,
    uploaded_percentage: u8,
    checksum: String,
    #[serde(skip)]
    content: Bytes,
}

impl ManagedFile {
    /// Wrap a raw source into a managed file in the `Loaded` state.
    ///
    /// When the bytes start with an embedded type marker the MIME type comes from the
    /// marker and the payload is decoded. Plain bytes take the MIME type the source
    /// declared, if any; it is never guessed from the extension.
    pub fn from_source(source: RawSource) -> Result<Self, FileError> {
        let RawSource {
            bytes,
            original_name,
            declared_size,
            declared_mime_type,
        } = source;

        if bytes.is_empty() {
            return Err(FileError::InvalidSource(format!(
                "source '{}' is empty",
                original_name
            )));
        }

        let checksum = sha256_hex(&bytes);
        let (mime_type, content) = match parse_type_marker(&bytes)? {
            Some(marker) => marker,
            None => (declared_mime_type, bytes),
        };

        if content.is_empty() {
            return Err(FileError::InvalidSource(format!(
                "source '{}' has an empty payload",
                original_name
            )));
        }

        let name = generate_name(&checksum, &original_name);
        let size = declared_size.unwrap_or(content.len() as u64);

        tracing::debug!(
            name = %name,
            original_name = %original_name,
            mime_type = ?mime_type,
            size_bytes = size,
            "Managed file loaded"
        );

        Ok(ManagedFile {
            name,
            original_name,
            mime_type,
            path: None,
            uri: None,
            size,
            public: false,
            temporary: false,
            storage_class: None,
            status: FileStatus::Loaded,
            uploaded_bytes: 0,
            uploaded_percentage: 0,
            checksum,
            content,
        })
    }

    /// Reference to an object that is already in storage, e.g. to delete it later.
    /// The file carries no content and starts in the `Uploaded` state.
    pub fn from_stored(key: &str, location: impl Into<String>) -> Result<Self, FileError> {
        let key = key.trim_start_matches('/');
        let name = key.rsplit('/').next().unwrap_or_default();
        if name.is_empty() {
            return Err(FileError::InvalidSource(format!(
                "storage key '{}' has no file name",
                key
            )));
        }

        Ok(ManagedFile {
            name: name.to_string(),
            original_name: name.to_string(),
            mime_type: None,
            path: Some(key.to_string()),
            uri: Some(location.into()),
            size: 0,
            public: false,
            temporary: false,
            storage_class: None,
            status: FileStatus::Uploaded,
            uploaded_bytes: 0,
            uploaded_percentage: 100,
            checksum: String::new(),
            content: Bytes::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit caller override of the generated name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.to_ascii_lowercase().starts_with("image/"))
    }

    /// Storage key, set once an upload succeeds.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Location reported by the transport, set once an upload succeeds.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn formatted_size(&self) -> String {
        format_size(self.size)
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn set_public(&mut self, public: bool) {
        self.public = public;
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn set_temporary(&mut self, temporary: bool) {
        self.temporary = temporary;
    }

    pub fn storage_class(&self) -> Option<&str> {
        self.storage_class.as_deref()
    }

    pub fn set_storage_class(&mut self, storage_class: Option<String>) {
        self.storage_class = storage_class;
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn uploaded_percentage(&self) -> u8 {
        self.uploaded_percentage
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Decoded binary payload.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Extension of the original name, empty when there is none.
    pub fn extension(&self) -> &str {
        file_extension(&self.original_name).unwrap_or("")
    }

    // Transfer state transitions

    /// `Loaded -> Uploading`, progress counters reset.
    pub fn begin_upload(&mut self) -> Result<(), FileError> {
        self.expect_status("upload", FileStatus::Loaded)?;
        self.status = FileStatus::Uploading;
        self.uploaded_bytes = 0;
        self.uploaded_percentage = 0;
        Ok(())
    }

    /// Apply one transport progress report. The percentage never goes backwards within
    /// one upload; a zero total counts as complete.
    pub fn record_progress(&mut self, loaded: u64, total: u64) {
        let percentage = if total == 0 {
            100
        } else {
            (u128::from(loaded.min(total)) * 100 / u128::from(total)) as u8
        };
        self.uploaded_bytes = loaded;
        self.uploaded_percentage = self.uploaded_percentage.max(percentage);
    }

    /// `Uploading -> Uploaded` with the storage key and location the transport returned.
    pub fn complete_upload(&mut self, key: impl Into<String>, location: impl Into<String>) {
        self.uploaded_percentage = 100;
        self.uploaded_bytes = self.size;
        self.path = Some(key.into());
        self.uri = Some(location.into());
        self.status = FileStatus::Uploaded;
    }

    /// Failed or cancelled upload: back to `Loaded` so it can be retried.
    pub fn revert_upload(&mut self) {
        self.status = FileStatus::Loaded;
    }

    /// `Uploaded -> Deleting`. Deleting a file that never reached storage is a caller error.
    pub fn begin_delete(&mut self) -> Result<(), FileError> {
        self.expect_status("delete", FileStatus::Uploaded)?;
        self.status = FileStatus::Deleting;
        Ok(())
    }

    pub fn complete_delete(&mut self) {
        self.status = FileStatus::Deleted;
    }

    pub fn revert_delete(&mut self) {
        self.status = FileStatus::Uploaded;
    }

    fn expect_status(&self, operation: &'static str, expected: FileStatus) -> Result<(), FileError> {
        if self.status != expected {
            return Err(FileError::InvalidState {
                operation,
                name: self.name.clone(),
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }
}

/// Split an embedded type marker off `raw`.
///
/// Returns `Ok(None)` when `raw` carries no marker, `(mime, payload)` when it does.
fn parse_type_marker(raw: &Bytes) -> Result<Option<(Option<String>, Bytes)>, FileError> {
    if !raw.starts_with(TYPE_MARKER_PREFIX) {
        return Ok(None);
    }

    let comma = raw
        .iter()
        .position(|b| *b == b',')
        .ok_or_else(|| FileError::InvalidSource("type marker has no payload separator".into()))?;

    let header = std::str::from_utf8(&raw[TYPE_MARKER_PREFIX.len()..comma])
        .map_err(|_| FileError::InvalidSource("type marker is not valid UTF-8".into()))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or("").trim();
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let mime_type = if mime.is_empty() {
        None
    } else if is_valid_mime(mime) {
        Some(mime.to_string())
    } else {
        return Err(FileError::InvalidSource(format!(
            "type marker carries an invalid MIME type: {}",
            mime
        )));
    };

    let payload = raw.slice(comma + 1..);
    let content = if is_base64 {
        let decoded = STANDARD
            .decode(payload.as_ref())
            .map_err(|e| FileError::InvalidSource(format!("invalid base64 payload: {}", e)))?;
        Bytes::from(decoded)
    } else {
        payload
    };

    Ok(Some((mime_type, content)))
}

fn is_valid_mime(mime: &str) -> bool {
    match mime.split_once('/') {
        Some((kind, sub)) => {
            !kind.is_empty()
                && !sub.is_empty()
                && !mime.contains(char::is_whitespace)
                && !sub.contains('/')
        }
        None => false,
    }
}

/// Human-readable size using 1024-based units, trailing zero decimals removed.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{:.2}", value);
    let formatted = formatted
        .strip_suffix(".00")
        .unwrap_or(&formatted)
        .to_string();
    format!("{} {}", formatted, UNITS[unit])
}
