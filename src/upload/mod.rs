//! Resumable file uploads.
//!
//! An [`Uploader`] drives one [`UploadSession`] through an explicit state
//! machine:
//!
//! ```text
//! Idle -> AuthorizingRequest -> SingleShotTransfer | MultipartTransfer -> Completing -> Complete
//!                  \______________________________________________________/
//!                                 ErrorRecoverable  (resume())
//! ```
//!
//! Each state performs at most one network exchange; the driver loop moves to
//! whatever state the step returns. Three transfer modes exist:
//!
//! - server-mediated: chunks POSTed to `file/chunk`, resumed from the offset
//!   the server reports;
//! - direct-to-storage single shot: one signed PUT, re-signed on resume;
//! - direct-to-storage multipart: signed parts plus an XML manifest, resumed
//!   from the next unsent part.
//!
//! Failures are never retried here. A failure after the upload exists leaves
//! the session in `ErrorRecoverable` for the caller to `resume()`; a failure
//! while initiating discards the session.

mod session;
mod source;
mod storage;

pub use session::{ResumeInfo, UploadFile, UploadSession, UploadState, UploadTarget};
pub use source::{ByteSource, FileSource, MemorySource};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::events::UploadEvent;
use crate::http::{ApiRequest, HttpError, ProgressFn};
use crate::models::{PartAuthorization, Record, ResumeOffset, SignedRequest, UploadRecord};
use session::{MultipartProgress, TransferMode};

/// Default chunk size for server-mediated uploads (64 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Behavior string for direct-to-storage uploads.
pub const STORAGE_BEHAVIOR: &str = "s3";

/// Errors returned by [`Uploader`].
#[derive(Debug, Error)]
pub enum UploadError {
    /// The upload could not be initiated. Nothing to resume; start again.
    #[error("{message}")]
    Start {
        message: String,
        identifier: Option<String>,
        status: Option<u16>,
    },
    /// A transfer step failed. `resume()` continues from the last acknowledged byte.
    #[error("{message}")]
    Transfer {
        message: String,
        status: Option<u16>,
    },
    #[error("cannot resume an upload in state {0}")]
    NotResumable(UploadState),
    #[error("failed to abort upload: {0}")]
    Abort(#[source] HttpError),
}

impl UploadError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, UploadError::Transfer { .. })
    }
}

/// Failure of a single state step.
#[derive(Debug, Error)]
pub(crate) enum StepError {
    #[error(transparent)]
    Server(#[from] HttpError),
    #[error("storage request failed: {0}")]
    Storage(HttpError),
    #[error("failed to read upload source: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Protocol(String),
}

impl StepError {
    fn user_message(&self) -> String {
        match self {
            StepError::Server(err) if err.is_connection() => {
                "Error: Connection to the server interrupted.".to_string()
            }
            StepError::Server(err) => match err.server_message() {
                Some(message) => format!("Error: {}", message),
                None => format!("Error: {}", err),
            },
            StepError::Storage(err) if err.is_connection() => {
                "Error: Could not connect to the storage provider.".to_string()
            }
            StepError::Storage(err) => format!(
                "Error occurred uploading to storage ({}).",
                err.status().unwrap_or_default()
            ),
            StepError::Io(err) => format!("Error reading file: {}", err),
            StepError::Protocol(message) => format!("Error: {}", message),
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            StepError::Server(err) | StepError::Storage(err) => err.status(),
            StepError::Io(_) | StepError::Protocol(_) => None,
        }
    }

    fn identifier(&self) -> Option<String> {
        match self {
            StepError::Server(err) => err.identifier().map(str::to_string),
            _ => None,
        }
    }
}

/// Payload bytes of a chunk that have been sent, given progress over the whole
/// request body. Body overhead beyond the chunk never counts as payload.
pub fn payload_progress(chunk_length: u64, body_loaded: u64, body_total: u64) -> u64 {
    (chunk_length + body_loaded)
        .saturating_sub(body_total)
        .min(chunk_length)
}

/// Drives uploads to completion, one session at a time.
pub struct Uploader {
    ctx: AppContext,
    chunk_size: u64,
    state: UploadState,
    session: Option<UploadSession>,
    /// State whose step failed, while in `ErrorRecoverable`.
    failed_in: Option<UploadState>,
}

impl Uploader {
    pub fn new(ctx: AppContext) -> Self {
        Self::with_chunk_size(ctx, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(ctx: AppContext, chunk_size: u64) -> Self {
        Self {
            ctx,
            chunk_size: chunk_size.max(1),
            state: UploadState::Idle,
            session: None,
            failed_in: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Upload `file` to `target`, returning the created file record.
    ///
    /// Any previous session is discarded.
    pub async fn execute(
        &mut self,
        target: UploadTarget,
        file: UploadFile,
    ) -> Result<Record, UploadError> {
        let session = UploadSession::new(file, target);
        info!(
            "Uploading {} ({} bytes) as session {}",
            session.file.name,
            session.size(),
            session.id
        );
        self.session = Some(session);
        self.failed_in = None;
        self.state = UploadState::AuthorizingRequest;
        self.drive().await
    }

    /// Continue an upload after a recoverable error.
    pub async fn resume(&mut self) -> Result<Record, UploadError> {
        if self.state != UploadState::ErrorRecoverable {
            return Err(UploadError::NotResumable(self.state));
        }
        let Some(session) = self.session.as_ref() else {
            return Err(UploadError::NotResumable(self.state));
        };

        let failed_in = self.failed_in.unwrap_or(UploadState::AuthorizingRequest);
        let next = match (&session.mode, failed_in) {
            // The server knows how many bytes actually landed.
            (TransferMode::Server, _) => UploadState::AuthorizingRequest,
            // Signatures expire: get a fresh one and start over.
            (TransferMode::StorageSingle { .. }, UploadState::SingleShotTransfer) => {
                UploadState::AuthorizingRequest
            }
            (_, state) => state,
        };
        debug!("Resuming session {} at {}", session.id, next);

        self.failed_in = None;
        self.state = next;
        self.drive().await
    }

    /// Tell the server to release the upload and drop the session.
    ///
    /// Does not interrupt a request already in flight.
    pub async fn abort(&mut self) -> Result<(), UploadError> {
        let upload_id = self.session.take().and_then(|s| s.upload_id);
        self.state = UploadState::Idle;
        self.failed_in = None;

        if let Some(upload_id) = upload_id {
            info!("Aborting upload {}", upload_id);
            self.ctx
                .transport()
                .send(ApiRequest::delete(&format!("file/upload/{}", upload_id)))
                .await
                .map_err(UploadError::Abort)?;
        }
        Ok(())
    }

    async fn drive(&mut self) -> Result<Record, UploadError> {
        loop {
            let step = match self.state {
                UploadState::AuthorizingRequest => self.authorize().await,
                UploadState::SingleShotTransfer => self.send_single().await,
                UploadState::MultipartTransfer => {
                    if matches!(self.mode(), Some(TransferMode::Server)) {
                        self.send_server_chunk().await
                    } else {
                        self.send_storage_part().await
                    }
                }
                UploadState::Completing => self.complete().await,
                UploadState::Complete => return Ok(self.finish()),
                UploadState::Idle | UploadState::ErrorRecoverable => {
                    return Err(UploadError::NotResumable(self.state));
                }
            };

            match step {
                Ok(next) => {
                    debug!("upload state {} -> {}", self.state, next);
                    self.state = next;
                }
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    fn mode(&self) -> Option<&TransferMode> {
        self.session.as_ref().map(|s| &s.mode)
    }

    fn session_mut(&mut self) -> Result<&mut UploadSession, StepError> {
        self.session
            .as_mut()
            .ok_or_else(|| StepError::Protocol("no upload session".into()))
    }

    /// Record a failed step and emit the matching event.
    fn fail(&mut self, err: StepError) -> UploadError {
        let message = err.user_message();
        let status = err.status();
        let starting = self.state == UploadState::AuthorizingRequest
            && self.session.as_ref().map_or(true, |s| s.upload_id.is_none());

        if starting {
            let session_id = self.session.take().map(|s| s.id).unwrap_or_else(Uuid::nil);
            warn!("Upload could not be started: {}", err);
            self.state = UploadState::Idle;
            self.failed_in = None;
            let identifier = err.identifier();
            self.ctx.events().emit(UploadEvent::ErrorStarting {
                session: session_id,
                message: message.clone(),
                identifier: identifier.clone(),
                status,
            });
            return UploadError::Start {
                message,
                identifier,
                status,
            };
        }

        warn!("Upload failed during {}: {}", self.state, err);
        self.failed_in = Some(self.state);
        self.state = UploadState::ErrorRecoverable;
        if let Some(session) = self.session.as_mut() {
            if let Some(upload_id) = session.upload_id.clone() {
                session.resume_info = Some(ResumeInfo {
                    upload_id,
                    file: session.file.clone(),
                });
            }
            self.ctx.events().emit(UploadEvent::Error {
                session: session.id,
                message: message.clone(),
                status,
            });
        }
        UploadError::Transfer { message, status }
    }

    /// Emit `complete`, reset the byte counter and drop the session.
    fn finish(&mut self) -> Record {
        let mut session = self.session.take();
        let file = session
            .as_mut()
            .and_then(|s| s.completed.take())
            .unwrap_or_default();
        if let Some(mut session) = session {
            session.start_byte = 0;
            session.resume_info = None;
            info!("Upload session {} complete", session.id);
            self.ctx.events().emit(UploadEvent::Complete {
                session: session.id,
                file: file.clone(),
            });
        }
        file
    }

    fn progress_reporter(
        &self,
        session: Uuid,
        start_byte: u64,
        chunk_length: u64,
        total: u64,
    ) -> ProgressFn {
        let events = self.ctx.events().clone();
        Arc::new(move |loaded, body_total| {
            events.emit(UploadEvent::Progress {
                session,
                start_byte,
                loaded: payload_progress(chunk_length, loaded, body_total),
                total,
            });
        })
    }

    fn chunk_sent(&self, session: Uuid, bytes: u64, acknowledged: u64) {
        self.ctx.events().emit(UploadEvent::ChunkSent {
            session,
            bytes,
            acknowledged,
        });
    }

    /// Initiate the upload, or re-authorize an existing one on resume.
    async fn authorize(&mut self) -> Result<UploadState, StepError> {
        let session = self.session_mut()?;
        match session.upload_id.clone() {
            None => self.initiate().await,
            Some(upload_id) => self.reauthorize(&upload_id).await,
        }
    }

    async fn initiate(&mut self) -> Result<UploadState, StepError> {
        let session = self.session_mut()?;
        let size = session.size();
        let request = match &session.target {
            UploadTarget::Parent {
                parent_type,
                parent_id,
            } => ApiRequest::post("file")
                .query("parentType", parent_type)
                .query("parentId", parent_id)
                .query("name", &session.file.name)
                .query("size", size)
                .query("mimeType", &session.file.mime_type),
            UploadTarget::NewContents { file_id } => {
                ApiRequest::put(&format!("file/{}/contents", file_id)).query("size", size)
            }
        };

        let response = self.ctx.transport().send(request).await?;
        let record: Record = response.json()?;

        // Empty files are created outright.
        if record.model_type() == Some("file") {
            let session = self.session_mut()?;
            session.completed = Some(record);
            return Ok(UploadState::Complete);
        }

        let upload: UploadRecord = serde_json::from_value(record.into_value())
            .map_err(|e| StepError::Protocol(format!("bad upload record: {}", e)))?;

        // Nothing touches the session until the whole reply checks out.
        let (mode, next) = match upload.behavior.as_deref() {
            Some(STORAGE_BEHAVIOR) => {
                let s3 = upload
                    .s3
                    .ok_or_else(|| StepError::Protocol("storage upload without s3 details".into()))?;
                if s3.chunked {
                    let progress = MultipartProgress {
                        initiate: s3.request,
                        part_size: s3.chunk_length.filter(|n| *n > 0).unwrap_or(self.chunk_size),
                        storage_upload_id: None,
                        next_part: 1,
                        etags: BTreeMap::new(),
                        finalize: None,
                    };
                    (TransferMode::StorageMultipart(progress), UploadState::MultipartTransfer)
                } else {
                    (
                        TransferMode::StorageSingle { request: s3.request },
                        UploadState::SingleShotTransfer,
                    )
                }
            }
            _ => (TransferMode::Server, UploadState::MultipartTransfer),
        };

        let session = self.session_mut()?;
        debug!("Upload {} initiated (behavior {:?})", upload.id, upload.behavior);
        session.upload_id = Some(upload.id);
        session.behavior = upload.behavior;
        session.start_byte = 0;
        session.mode = mode;
        Ok(next)
    }

    /// Ask the server where to pick up again.
    async fn reauthorize(&mut self, upload_id: &str) -> Result<UploadState, StepError> {
        let request = ApiRequest::get("file/offset").query("uploadId", upload_id);
        let response = self.ctx.transport().send(request).await?;
        let session = self.session_mut()?;

        match &mut session.mode {
            TransferMode::Server => {
                let ResumeOffset { offset } = response.json()?;
                if offset > session.file.size() {
                    return Err(StepError::Protocol(format!(
                        "server offset {} is past the end of the file",
                        offset
                    )));
                }
                debug!("Server reports offset {} for upload {}", offset, upload_id);
                session.start_byte = offset;
                Ok(UploadState::MultipartTransfer)
            }
            TransferMode::StorageSingle { request } => {
                *request = response.json::<SignedRequest>()?;
                session.start_byte = 0;
                Ok(UploadState::SingleShotTransfer)
            }
            TransferMode::StorageMultipart(_) => Ok(UploadState::MultipartTransfer),
        }
    }

    async fn send_server_chunk(&mut self) -> Result<UploadState, StepError> {
        let chunk_size = self.chunk_size;
        let session = self.session_mut()?;
        let upload_id = session
            .upload_id
            .clone()
            .ok_or_else(|| StepError::Protocol("chunk without upload id".into()))?;
        let size = session.size();
        let start = session.start_byte;
        let end = (start + chunk_size).min(size);
        session.chunk_length = end - start;
        let source = session.file.source.clone();
        let session_id = session.id;

        let data = source.read_range(start, end).await?;
        let request = ApiRequest::post("file/chunk")
            .query("offset", start)
            .query("uploadId", &upload_id)
            .bytes(data)
            .on_progress(self.progress_reporter(session_id, start, end - start, size));
        let response = self.ctx.transport().send(request).await?;

        self.chunk_sent(session_id, end - start, end);
        let session = self.session_mut()?;
        if end >= size {
            session.completed = Some(response.json()?);
            Ok(UploadState::Completing)
        } else {
            session.start_byte = end;
            Ok(UploadState::MultipartTransfer)
        }
    }

    async fn send_single(&mut self) -> Result<UploadState, StepError> {
        let session = self.session_mut()?;
        let TransferMode::StorageSingle { request: signed } = &session.mode else {
            return Err(StepError::Protocol("single-shot transfer without a signed request".into()));
        };
        let signed = signed.clone();
        let size = session.size();
        session.start_byte = 0;
        session.chunk_length = size;
        let source = session.file.source.clone();
        let session_id = session.id;

        let data = source.read_range(0, size).await?;
        let request = storage::signed_request(&signed)?
            .bytes(data)
            .on_progress(self.progress_reporter(session_id, 0, size, size));
        self.ctx
            .transport()
            .send(request)
            .await
            .map_err(StepError::Storage)?;

        self.chunk_sent(session_id, size, size);
        self.session_mut()?.start_byte = size;
        Ok(UploadState::Completing)
    }

    async fn send_storage_part(&mut self) -> Result<UploadState, StepError> {
        let session = self.session_mut()?;
        let upload_id = session
            .upload_id
            .clone()
            .ok_or_else(|| StepError::Protocol("part without upload id".into()))?;
        let TransferMode::StorageMultipart(progress) = &session.mode else {
            return Err(StepError::Protocol("multipart transfer in the wrong mode".into()));
        };
        let progress = progress.clone();
        let size = session.size();
        let start = session.start_byte;
        let session_id = session.id;
        let source = session.file.source.clone();

        let Some(storage_upload_id) = progress.storage_upload_id.clone() else {
            return self.initiate_multipart(&progress.initiate).await;
        };

        let wanted = (start + progress.part_size).min(size) - start;

        // The server signs the part; the bytes then go straight to storage.
        let authorization = ApiRequest::post("file/chunk")
            .query("offset", 0)
            .query("uploadId", &upload_id)
            .json(json!({
                "s3UploadId": storage_upload_id,
                "partNumber": progress.next_part,
                "contentLength": wanted,
            }));
        let response = self.ctx.transport().send(authorization).await?;
        let PartAuthorization { s3 } = response.json()?;

        // Every part must move the start byte forward.
        let length = match s3.chunk_length {
            None => wanted,
            Some(0) if wanted > 0 => {
                return Err(StepError::Protocol(format!(
                    "part {} authorized with zero length",
                    progress.next_part
                )));
            }
            Some(n) => n.min(size - start),
        };
        let end = start + length;
        let data = source.read_range(start, end).await?;
        self.session_mut()?.chunk_length = end - start;
        let request = storage::signed_request(&s3.request)?
            .bytes(data)
            .on_progress(self.progress_reporter(session_id, start, end - start, size));
        let response = self
            .ctx
            .transport()
            .send(request)
            .await
            .map_err(StepError::Storage)?;
        let etag = storage::part_etag(&response)?;

        self.chunk_sent(session_id, end - start, end);
        let session = self.session_mut()?;
        session.start_byte = end;
        if let TransferMode::StorageMultipart(progress) = &mut session.mode {
            progress.etags.insert(progress.next_part, etag);
            progress.next_part += 1;
        }

        if end < size {
            Ok(UploadState::MultipartTransfer)
        } else {
            Ok(UploadState::Completing)
        }
    }

    async fn initiate_multipart(&mut self, initiate: &SignedRequest) -> Result<UploadState, StepError> {
        let request = storage::signed_request(initiate)?;
        let response = self
            .ctx
            .transport()
            .send(request)
            .await
            .map_err(StepError::Storage)?;
        let storage_upload_id = storage::parse_initiate(&response)?;

        let session = self.session_mut()?;
        debug!("Storage multipart upload {} initiated", storage_upload_id);
        session.start_byte = 0;
        if let TransferMode::StorageMultipart(progress) = &mut session.mode {
            progress.storage_upload_id = Some(storage_upload_id);
            progress.next_part = 1;
            progress.etags.clear();
        }
        Ok(UploadState::MultipartTransfer)
    }

    async fn complete(&mut self) -> Result<UploadState, StepError> {
        let session = self.session_mut()?;
        let upload_id = session.upload_id.clone();
        match session.mode.clone() {
            TransferMode::Server => {
                if session.completed.is_none() {
                    return Err(StepError::Protocol("final chunk returned no file".into()));
                }
                Ok(UploadState::Complete)
            }
            TransferMode::StorageSingle { .. } => {
                let upload_id =
                    upload_id.ok_or_else(|| StepError::Protocol("no upload id to complete".into()))?;
                let file = self.request_completion(&upload_id).await?;
                self.session_mut()?.completed = Some(file);
                Ok(UploadState::Complete)
            }
            TransferMode::StorageMultipart(progress) => {
                let (file, finalize) = match progress.finalize {
                    Some(pending) => pending,
                    None => {
                        let upload_id = upload_id
                            .ok_or_else(|| StepError::Protocol("no upload id to complete".into()))?;
                        let mut file = self.request_completion(&upload_id).await?;
                        let finalize: SignedRequest = file
                            .remove("s3FinalizeRequest")
                            .ok_or_else(|| {
                                StepError::Protocol("completion returned no s3FinalizeRequest".into())
                            })
                            .and_then(|v| {
                                serde_json::from_value(v)
                                    .map_err(|e| StepError::Protocol(format!("bad finalize request: {}", e)))
                            })?;
                        // The server has finalized; only the manifest PUT is left.
                        if let TransferMode::StorageMultipart(p) = &mut self.session_mut()?.mode {
                            p.finalize = Some((file.clone(), finalize.clone()));
                        }
                        (file, finalize)
                    }
                };

                let manifest = storage::build_manifest(&progress.etags)?;
                let request = storage::signed_request(&finalize)?.text(manifest);
                self.ctx
                    .transport()
                    .send(request)
                    .await
                    .map_err(StepError::Storage)?;

                self.session_mut()?.completed = Some(file);
                Ok(UploadState::Complete)
            }
        }
    }

    async fn request_completion(&self, upload_id: &str) -> Result<Record, StepError> {
        let request = ApiRequest::post("file/completion").query("uploadId", upload_id);
        let response = self.ctx.transport().send(request).await?;
        Ok(response.json()?)
    }
}
