//! Sending side of a transfer.
//!
//! Drives the wire exchange for one file: metadata (or resume negotiation),
//! then strictly sequential chunk/ack pairs, then COMPLETE. Within that
//! sequential loop, chunk preparation fans out through the pipeline window.

use crate::config::TransferConfig;
use crate::error::{EngineError, Result};
use crate::limiter::SpeedLimiter;
use crate::session::{TransferSession, TransferState};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trestle_crypto::{stream, CipherSuite, KeyManager, SessionKey, Signer, SESSION_SALT_LEN};
use trestle_files::{
    file_sha256_hex, merkle_root_hex, window_size, ChunkPipeline, Compressor, DeflateCompressor,
    FileChunker,
};
use trestle_proto::{
    CompleteMessage, Connection, FileMetadataMessage, Framed, MessageType, ResumeRequest,
};

/// Everything derived from the source file before any byte hits the wire.
struct PreparedTransfer {
    metadata: FileMetadataMessage,
    /// File whose bytes travel as chunks: the source, or the streamed
    /// ciphertext staging file.
    wire_path: PathBuf,
    /// Staging file to delete when the transfer ends, if any.
    staging: Option<PathBuf>,
    /// Per-chunk AEAD key. Absent for plaintext and streamed transfers.
    chunk_key: Option<SessionKey>,
    /// Aggregate ciphertext HMAC for the COMPLETE extension.
    aggregate_tag: Option<[u8; 32]>,
}

impl PreparedTransfer {
    fn cleanup(&self) {
        if let Some(path) = &self.staging {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove staging file");
            }
        }
    }
}

/// Sends files over protocol connections.
pub struct TransferSender {
    config: TransferConfig,
    key_manager: Arc<KeyManager>,
    signer: Option<Arc<dyn Signer>>,
}

impl TransferSender {
    /// Sender with the given configuration and key manager.
    #[must_use]
    pub fn new(config: TransferConfig, key_manager: Arc<KeyManager>) -> Self {
        Self {
            config,
            key_manager,
            signer: None,
        }
    }

    /// Attach a signing provider; used when the config enables signing.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Send `path` to `peer` over `conn` as a new transfer.
    ///
    /// Returns the metadata that was sent, which the queue persists so a
    /// later resume can reconstruct keys and layout.
    ///
    /// # Errors
    ///
    /// Returns the transfer error after recording it on the session.
    pub async fn send_file<C: Connection>(
        &self,
        conn: C,
        path: &Path,
        peer: &str,
        session: &TransferSession,
    ) -> Result<FileMetadataMessage> {
        self.send_file_with(conn, path, peer, session, |_| {}).await
    }

    /// Like [`TransferSender::send_file`], but calls `on_metadata` as soon
    /// as the metadata exists, before any chunk is sent. The queue uses this
    /// to persist metadata so a mid-transfer failure can still resume.
    ///
    /// # Errors
    ///
    /// Returns the transfer error after recording it on the session.
    pub async fn send_file_with<C, F>(
        &self,
        conn: C,
        path: &Path,
        peer: &str,
        session: &TransferSession,
        on_metadata: F,
    ) -> Result<FileMetadataMessage>
    where
        C: Connection,
        F: FnOnce(&FileMetadataMessage) + Send,
    {
        self.config.validate()?;
        let prepared = match self.prepare(path, peer, session.id()).await {
            Ok(p) => p,
            Err(e) => {
                session.fail(&e);
                return Err(e);
            }
        };
        let metadata = prepared.metadata.clone();
        on_metadata(&metadata);
        self.drive(conn, prepared, peer, session, 0).await?;
        Ok(metadata)
    }

    /// Resume a previously interrupted transfer of `path` at `resume_offset`
    /// wire bytes, reusing the stored `metadata`.
    ///
    /// # Errors
    ///
    /// Returns the transfer error after recording it on the session.
    pub async fn resume_file<C: Connection>(
        &self,
        conn: C,
        path: &Path,
        peer: &str,
        session: &TransferSession,
        metadata: &FileMetadataMessage,
        resume_offset: u64,
    ) -> Result<()> {
        self.config.validate()?;
        let prepared = match self.reprepare(path, peer, metadata).await {
            Ok(p) => p,
            Err(e) => {
                session.fail(&e);
                return Err(e);
            }
        };
        self.drive(conn, prepared, peer, session, resume_offset).await
    }

    async fn drive<C: Connection>(
        &self,
        conn: C,
        prepared: PreparedTransfer,
        peer: &str,
        session: &TransferSession,
        resume_offset: u64,
    ) -> Result<()> {
        let result = self
            .exchange(conn, &prepared, session, resume_offset)
            .await;
        prepared.cleanup();
        match result {
            Ok(()) => {
                session.transition(TransferState::Completed)?;
                tracing::info!(
                    id = %prepared.metadata.transfer_id,
                    peer,
                    bytes = prepared.metadata.wire_size,
                    "transfer sent"
                );
                Ok(())
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                session.fail(&e);
                tracing::warn!(id = %prepared.metadata.transfer_id, peer, error = %e, "send failed");
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        path: &Path,
        peer: &str,
        transfer_id: &str,
    ) -> Result<PreparedTransfer> {
        let file_size = tokio::fs::metadata(path)
            .await
            .map_err(|e| EngineError::Resource(format!("{}: {e}", path.display())))?
            .len();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| EngineError::Resource(format!("unusable file name: {}", path.display())))?
            .to_owned();

        let streamed = self.config.is_streamed(file_size);
        let chunk_size = self.config.chunk_size;

        let session_material = if self.config.encrypt {
            Some(self.key_manager.current_session(peer).await?)
        } else {
            None
        };

        let hash_path = path.to_owned();
        let file_hash = tokio::task::spawn_blocking(move || file_sha256_hex(&hash_path))
            .await
            .map_err(|e| EngineError::Resource(format!("hash task: {e}")))??;
        let merkle_path = path.to_owned();
        let merkle_root =
            tokio::task::spawn_blocking(move || merkle_root_hex(&merkle_path, chunk_size))
                .await
                .map_err(|e| EngineError::Resource(format!("merkle task: {e}")))??;

        let (wire_path, staging, wire_size, aggregate_tag, chunk_key) = if streamed {
            let (salt, key) = session_material
                .as_ref()
                .ok_or_else(|| EngineError::Security("streamed transfer without key".into()))?;
            let hmac_key = self.key_manager.stream_hmac_key_for(peer, salt).await?;
            let nonce_salt = self.key_manager.stream_nonce_salt_for(peer, salt).await?;

            let staging = std::env::temp_dir().join(format!("{transfer_id}.enc"));
            let src = path.to_owned();
            let dst = staging.clone();
            let key = key.clone();
            let tag = tokio::task::spawn_blocking(move || {
                stream::encrypt_file(&src, &dst, &key, &nonce_salt, &hmac_key)
            })
            .await
            .map_err(|e| EngineError::Resource(format!("encrypt task: {e}")))??;

            let wire_size = tokio::fs::metadata(&staging).await?.len();
            (staging.clone(), Some(staging), wire_size, Some(tag), None)
        } else {
            let chunk_key = session_material.as_ref().map(|(_, key)| key.clone());
            (path.to_owned(), None, file_size, None, chunk_key)
        };

        let signature = if self.config.sign {
            let signer = self
                .signer
                .as_ref()
                .ok_or_else(|| EngineError::Config("signing enabled without a signer".into()))?;
            Some(hex::encode(signer.sign(file_hash.as_bytes())?))
        } else {
            None
        };

        let metadata = FileMetadataMessage {
            transfer_id: transfer_id.to_owned(),
            file_name,
            file_size,
            wire_size,
            file_hash,
            merkle_root,
            hash_algorithm: "sha-256".into(),
            compressed: self.config.compress && !streamed,
            encrypted: self.config.encrypt,
            streamed,
            chunk_size: chunk_size as u64,
            session_salt: session_material.as_ref().map(|(salt, _)| hex::encode(salt)),
            cipher_suite: self
                .config
                .encrypt
                .then(|| CipherSuite::Hybrid.name().to_owned()),
            signature,
            signature_algorithm: self
                .config
                .sign
                .then(|| self.signer.as_ref().map(|s| s.algorithm().to_owned()))
                .flatten(),
            signer_id: self
                .config
                .sign
                .then(|| self.signer.as_ref().map(|s| s.signer_id().to_owned()))
                .flatten(),
        };

        Ok(PreparedTransfer {
            metadata,
            wire_path,
            staging,
            chunk_key,
            aggregate_tag,
        })
    }

    /// Rebuild wire state for a resume from persisted metadata. Streamed
    /// ciphertext is regenerated deterministically from the session salt.
    async fn reprepare(
        &self,
        path: &Path,
        peer: &str,
        metadata: &FileMetadataMessage,
    ) -> Result<PreparedTransfer> {
        let salt = metadata
            .session_salt
            .as_deref()
            .map(parse_session_salt)
            .transpose()?;

        let (wire_path, staging, aggregate_tag, chunk_key) = if metadata.streamed {
            let salt = salt
                .ok_or_else(|| EngineError::Security("streamed metadata without salt".into()))?;
            let key = self.key_manager.session_key_for(peer, &salt).await?;
            let hmac_key = self.key_manager.stream_hmac_key_for(peer, &salt).await?;
            let nonce_salt = self.key_manager.stream_nonce_salt_for(peer, &salt).await?;

            let staging = std::env::temp_dir().join(format!("{}.enc", metadata.transfer_id));
            let src = path.to_owned();
            let dst = staging.clone();
            let tag = tokio::task::spawn_blocking(move || {
                stream::encrypt_file(&src, &dst, &key, &nonce_salt, &hmac_key)
            })
            .await
            .map_err(|e| EngineError::Resource(format!("encrypt task: {e}")))??;

            (staging.clone(), Some(staging), Some(tag), None)
        } else {
            let chunk_key = match (metadata.encrypted, salt) {
                (true, Some(salt)) => Some(self.key_manager.session_key_for(peer, &salt).await?),
                (true, None) => {
                    return Err(EngineError::Security(
                        "encrypted metadata without salt".into(),
                    ))
                }
                (false, _) => None,
            };
            (path.to_owned(), None, None, chunk_key)
        };

        Ok(PreparedTransfer {
            metadata: metadata.clone(),
            wire_path,
            staging,
            chunk_key,
            aggregate_tag,
        })
    }

    async fn exchange<C: Connection>(
        &self,
        conn: C,
        prepared: &PreparedTransfer,
        session: &TransferSession,
        resume_offset: u64,
    ) -> Result<()> {
        let metadata = &prepared.metadata;
        let chunk_size = metadata.chunk_size as usize;
        let mut framed = Framed::new(conn);

        if resume_offset == 0 {
            framed
                .write_message(MessageType::Metadata, &metadata.encode()?)
                .await?;
            framed.read_ack().await?;
        } else {
            let request = ResumeRequest {
                transfer_id: metadata.transfer_id.clone(),
                resume_offset,
            };
            framed
                .write_message(MessageType::ResumeRequest, &request.encode()?)
                .await?;
            let (mt, body) = framed.read_message().await?;
            if mt != MessageType::ResumeAck {
                return Err(EngineError::Protocol(format!(
                    "expected resume ack, got {mt:?}"
                )));
            }
            trestle_proto::decode_resume_ack(&body)?;
        }

        session.transition(TransferState::Transferring)?;
        session.set_total_bytes(metadata.wire_size);
        if resume_offset > 0 {
            session.record_bytes(resume_offset);
        }

        let total_chunks = metadata.wire_size.div_ceil(metadata.chunk_size) as u32;
        let start_index = (resume_offset / metadata.chunk_size) as u32;

        let compressor = metadata
            .compressed
            .then(|| Arc::new(DeflateCompressor::default()) as Arc<dyn Compressor>);
        let pipeline = ChunkPipeline::new(
            metadata.transfer_id.clone(),
            total_chunks,
            compressor,
            prepared.chunk_key.clone(),
        );
        let mut limiter = SpeedLimiter::new(self.config.max_transfer_speed);

        if total_chunks > 0 {
            let mut chunker = FileChunker::new(&prepared.wire_path, chunk_size)?;
            if start_index > 0 {
                chunker.seek_to_chunk(start_index)?;
            }

            loop {
                session.checkpoint().await?;
                let window = chunker.read_window(window_size())?;
                if window.is_empty() {
                    break;
                }
                let raw_sizes: HashMap<u32, u64> = window
                    .iter()
                    .map(|(idx, data)| (*idx, data.len() as u64))
                    .collect();

                let packets = pipeline.encode_window(window).await?;
                for packet in packets {
                    session.checkpoint().await?;
                    let body = packet.encode()?;
                    limiter.throttle(body.len() as u64).await;
                    framed.write_message(MessageType::Chunk, &body).await?;
                    framed.read_ack().await?;
                    session.record_bytes(raw_sizes.get(&packet.index).copied().unwrap_or(0));
                    tracing::trace!(
                        id = %metadata.transfer_id,
                        index = packet.index,
                        total = total_chunks,
                        "chunk acknowledged"
                    );
                }
            }
        }

        let complete = match prepared.aggregate_tag {
            Some(tag) => CompleteMessage::with_tag(metadata.transfer_id.clone(), tag.to_vec()),
            None => CompleteMessage::bare(),
        };
        framed
            .write_message(MessageType::Complete, &complete.encode()?)
            .await?;
        framed.read_ack().await?;
        Ok(())
    }
}

pub(crate) fn parse_session_salt(hex_salt: &str) -> Result<[u8; SESSION_SALT_LEN]> {
    let bytes = hex::decode(hex_salt)
        .map_err(|_| EngineError::Protocol("session salt is not valid hex".into()))?;
    bytes
        .try_into()
        .map_err(|_| EngineError::Protocol("session salt has wrong length".into()))
}
