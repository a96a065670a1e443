//! State carried by one in-flight upload.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use super::source::{ByteSource, FileSource, MemorySource};
use crate::models::{Record, SignedRequest};

/// The local file being uploaded.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub source: Arc<dyn ByteSource>,
}

impl UploadFile {
    pub fn new(name: &str, mime_type: &str, source: Arc<dyn ByteSource>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            source,
        }
    }

    /// In-memory file; the MIME type is guessed from `name`.
    pub fn from_bytes(name: &str, data: Vec<u8>) -> Self {
        let mime = mime_guess::from_path(name).first_or_octet_stream();
        Self::new(name, mime.essence_str(), Arc::new(MemorySource::new(data)))
    }

    /// File on disk; the name and MIME type come from the path.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let source = FileSource::open(path).await?;
        Ok(Self::new(&name, mime.essence_str(), Arc::new(source)))
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }
}

/// Where the uploaded bytes end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// New file under a folder or item.
    Parent {
        parent_type: String,
        parent_id: String,
    },
    /// Replace the contents of an existing file.
    NewContents { file_id: String },
}

impl UploadTarget {
    pub fn folder(parent_id: &str) -> Self {
        UploadTarget::Parent {
            parent_type: "folder".to_string(),
            parent_id: parent_id.to_string(),
        }
    }

    pub fn item(parent_id: &str) -> Self {
        UploadTarget::Parent {
            parent_type: "item".to_string(),
            parent_id: parent_id.to_string(),
        }
    }
}

/// What `resume()` needs to continue a failed upload.
#[derive(Debug, Clone)]
pub struct ResumeInfo {
    pub upload_id: String,
    pub file: UploadFile,
}

/// Upload driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    /// Initiating the upload, or re-authorizing it on resume.
    AuthorizingRequest,
    SingleShotTransfer,
    MultipartTransfer,
    Completing,
    Complete,
    ErrorRecoverable,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Idle => "idle",
            UploadState::AuthorizingRequest => "authorizing",
            UploadState::SingleShotTransfer => "single-shot transfer",
            UploadState::MultipartTransfer => "multipart transfer",
            UploadState::Completing => "completing",
            UploadState::Complete => "complete",
            UploadState::ErrorRecoverable => "recoverable error",
        };
        f.write_str(name)
    }
}

/// Progress of a direct-to-storage multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MultipartProgress {
    pub initiate: SignedRequest,
    pub part_size: u64,
    /// Storage provider's id, known once initiation succeeded.
    pub storage_upload_id: Option<String>,
    pub next_part: u32,
    pub etags: BTreeMap<u32, String>,
    /// Finalized file record and manifest request, once the server finalized.
    pub finalize: Option<(Record, SignedRequest)>,
}

/// How the bytes travel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransferMode {
    /// Chunks POSTed to the server.
    Server,
    /// One signed PUT straight to storage.
    StorageSingle { request: SignedRequest },
    /// Signed parts straight to storage, then a manifest.
    StorageMultipart(MultipartProgress),
}

/// One file transfer from initiation to completion.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Local id used to correlate events.
    pub id: Uuid,
    pub file: UploadFile,
    pub target: UploadTarget,
    /// Server-assigned upload id.
    pub upload_id: Option<String>,
    /// Next unsent byte.
    pub start_byte: u64,
    /// Payload size of the in-flight chunk.
    pub chunk_length: u64,
    pub resume_info: Option<ResumeInfo>,
    /// `None` for server-mediated uploads, `Some("s3")` for direct-to-storage.
    pub behavior: Option<String>,
    pub(crate) mode: TransferMode,
    pub(crate) completed: Option<Record>,
}

impl UploadSession {
    pub fn new(file: UploadFile, target: UploadTarget) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            target,
            upload_id: None,
            start_byte: 0,
            chunk_length: 0,
            resume_info: None,
            behavior: None,
            mode: TransferMode::Server,
            completed: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.file.size()
    }

    pub fn is_recoverable(&self) -> bool {
        self.resume_info.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_guesses_mime_type() {
        let file = UploadFile::from_bytes("notes.txt", b"abc".to_vec());
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(file.size(), 3);

        let file = UploadFile::from_bytes("blob", vec![0; 8]);
        assert_eq!(file.mime_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_from_path_takes_name_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "scan.png");
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.size(), 4);
    }

    #[test]
    fn test_new_session_is_healthy() {
        let session = UploadSession::new(
            UploadFile::from_bytes("a.bin", vec![0; 4]),
            UploadTarget::folder("f1"),
        );
        assert_eq!(session.start_byte, 0);
        assert!(!session.is_recoverable());
        assert_eq!(session.mode, TransferMode::Server);
    }

    #[test]
    fn test_modes_compare_by_value() {
        let signed = SignedRequest {
            method: "PUT".into(),
            url: "https://storage.example/key".into(),
            headers: Default::default(),
        };
        let progress = MultipartProgress {
            initiate: signed.clone(),
            part_size: 4,
            storage_upload_id: Some("S3UP".into()),
            next_part: 2,
            etags: BTreeMap::from([(1, "\"etag-1\"".to_string())]),
            finalize: Some((Record::default(), signed.clone())),
        };
        let mode = TransferMode::StorageMultipart(progress.clone());
        assert_eq!(mode, TransferMode::StorageMultipart(progress));
        assert_ne!(mode, TransferMode::StorageSingle { request: signed });
    }
}
