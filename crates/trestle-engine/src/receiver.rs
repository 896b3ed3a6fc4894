//! Receiving side of a transfer.
//!
//! Accepts either a fresh transfer (METADATA first) or a resume
//! (RESUME_REQUEST for a transfer this receiver still has staged). Chunks
//! are verified, reversed through the pipeline, and written into a `.part`
//! staging file; the destination only appears under its final name after
//! every integrity check passes.

use crate::error::{EngineError, Result};
use crate::sender::parse_session_salt;
use crate::session::{TransferSession, TransferState};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trestle_crypto::{stream, KeyManager, Verifier};
use trestle_files::{
    file_sha256_hex, merkle_root_hex, ChunkPipeline, Compressor, DeflateCompressor,
    FileReassembler,
};
use trestle_proto::{
    ChunkPacket, CompleteMessage, Connection, FileMetadataMessage, Framed, MessageType,
    ResumeRequest,
};

/// A transfer whose staging file survives a dropped connection, keyed for
/// the resume protocol.
#[derive(Debug, Clone)]
struct PendingTransfer {
    metadata: FileMetadataMessage,
    wire_part: PathBuf,
}

/// Receives files over protocol connections.
///
/// One receiver may serve many sequential connections; interrupted transfers
/// stay in its pending registry so a peer can resume them.
pub struct TransferReceiver {
    output_dir: PathBuf,
    key_manager: Arc<KeyManager>,
    verifier: Option<Arc<dyn Verifier>>,
    pending: DashMap<String, PendingTransfer>,
}

impl TransferReceiver {
    /// Receiver writing completed files into `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, key_manager: Arc<KeyManager>) -> Self {
        Self {
            output_dir: output_dir.into(),
            key_manager,
            verifier: None,
            pending: DashMap::new(),
        }
    }

    /// Attach a signature verifier. Without one, any transfer carrying a
    /// signature is refused rather than accepted unverified.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Transfers staged for resume.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Serve one transfer over `conn`, returning the final file path.
    ///
    /// # Errors
    ///
    /// Returns the transfer error after recording it on the session. A
    /// network failure leaves the staging file in place for resume; an
    /// integrity failure or cancellation removes it.
    pub async fn receive_file<C: Connection>(
        &self,
        conn: C,
        peer: &str,
        session: &TransferSession,
    ) -> Result<PathBuf> {
        let result = self.exchange(conn, peer, session).await;
        match result {
            Ok(path) => {
                session.transition(TransferState::Completed)?;
                tracing::info!(peer, path = %path.display(), "transfer received");
                Ok(path)
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                session.fail(&e);
                tracing::warn!(peer, error = %e, "receive failed");
                Err(e)
            }
        }
    }

    async fn exchange<C: Connection>(
        &self,
        conn: C,
        peer: &str,
        session: &TransferSession,
    ) -> Result<PathBuf> {
        let mut framed = Framed::new(conn);

        let (metadata, wire_part, mut reassembler) = match framed.read_message().await? {
            (MessageType::Metadata, body) => {
                let metadata = FileMetadataMessage::decode(&body)?;
                validate_metadata(&metadata)?;
                let wire_part = self.wire_part_path(&metadata);
                let reassembler = FileReassembler::new(
                    &wire_part,
                    metadata.wire_size,
                    metadata.chunk_size as usize,
                )?;
                self.pending.insert(
                    metadata.transfer_id.clone(),
                    PendingTransfer {
                        metadata: metadata.clone(),
                        wire_part: wire_part.clone(),
                    },
                );
                framed.write_ack().await?;
                tracing::debug!(id = %metadata.transfer_id, file = %metadata.file_name, "transfer offered");
                (metadata, wire_part, reassembler)
            }
            (MessageType::ResumeRequest, body) => {
                let request = ResumeRequest::decode(&body)?;
                let Some(entry) = self.pending.get(&request.transfer_id) else {
                    // Unknown transfer: close rather than silently restart.
                    return Err(EngineError::Protocol(format!(
                        "resume requested for unknown transfer {}",
                        request.transfer_id
                    )));
                };
                let pending = entry.clone();
                drop(entry);

                if request.resume_offset % pending.metadata.chunk_size != 0
                    || request.resume_offset > pending.metadata.wire_size
                {
                    return Err(EngineError::Protocol(format!(
                        "unusable resume offset {}",
                        request.resume_offset
                    )));
                }
                let resume_index = (request.resume_offset / pending.metadata.chunk_size) as u32;
                let reassembler = FileReassembler::resume(
                    &pending.wire_part,
                    pending.metadata.wire_size,
                    pending.metadata.chunk_size as usize,
                    resume_index,
                )?;
                framed
                    .write_message(MessageType::ResumeAck, &trestle_proto::encode_resume_ack())
                    .await?;
                tracing::debug!(
                    id = %pending.metadata.transfer_id,
                    offset = request.resume_offset,
                    "transfer resumed"
                );
                (pending.metadata, pending.wire_part, reassembler)
            }
            (other, _) => {
                return Err(EngineError::Protocol(format!(
                    "expected metadata or resume request, got {other:?}"
                )))
            }
        };

        session.transition(TransferState::Transferring)?;
        session.set_total_bytes(metadata.wire_size);
        session.record_bytes(u64::from(reassembler.received_count()) * metadata.chunk_size);

        let pipeline = self.decode_pipeline(&metadata, peer).await?;

        let complete = loop {
            if let Err(e) = session.checkpoint().await {
                self.discard(&metadata, &wire_part);
                return Err(e);
            }
            match framed.read_message().await? {
                (MessageType::Chunk, body) => {
                    let packet = ChunkPacket::decode(&body)?;
                    if packet.transfer_id != metadata.transfer_id {
                        return Err(EngineError::Protocol(format!(
                            "chunk for foreign transfer {}",
                            packet.transfer_id
                        )));
                    }
                    let data = match pipeline.decode_chunk(&packet) {
                        Ok(data) => data,
                        Err(e) => {
                            self.discard(&metadata, &wire_part);
                            return Err(e.into());
                        }
                    };
                    reassembler.write_chunk(packet.index, &data)?;
                    framed.write_ack().await?;
                    session.record_bytes(data.len() as u64);
                }
                (MessageType::Complete, body) => {
                    let complete = CompleteMessage::decode(&body)?;
                    framed.write_ack().await?;
                    break complete;
                }
                (other, _) => {
                    return Err(EngineError::Protocol(format!(
                        "unexpected message during chunk exchange: {other:?}"
                    )))
                }
            }
        };

        if let Err(e) = reassembler.finalize() {
            return Err(e.into());
        }

        let final_path = match self.verify_and_finalize(&metadata, &wire_part, &complete, peer).await
        {
            Ok(path) => path,
            Err(e) => {
                self.discard(&metadata, &wire_part);
                return Err(e);
            }
        };

        self.pending.remove(&metadata.transfer_id);
        Ok(final_path)
    }

    fn wire_part_path(&self, metadata: &FileMetadataMessage) -> PathBuf {
        let suffix = if metadata.streamed { ".part.enc" } else { ".part" };
        self.output_dir
            .join(format!("{}{suffix}", metadata.file_name))
    }

    async fn decode_pipeline(
        &self,
        metadata: &FileMetadataMessage,
        peer: &str,
    ) -> Result<ChunkPipeline> {
        let key = if metadata.encrypted && !metadata.streamed {
            let salt = metadata
                .session_salt
                .as_deref()
                .ok_or_else(|| EngineError::Protocol("encrypted metadata without salt".into()))?;
            Some(
                self.key_manager
                    .session_key_for(peer, &parse_session_salt(salt)?)
                    .await?,
            )
        } else {
            None
        };
        let compressor = metadata
            .compressed
            .then(|| Arc::new(DeflateCompressor::default()) as Arc<dyn Compressor>);

        let total_chunks = metadata.wire_size.div_ceil(metadata.chunk_size) as u32;
        Ok(ChunkPipeline::new(
            metadata.transfer_id.clone(),
            total_chunks,
            compressor,
            key,
        ))
    }

    /// Post-receipt pipeline: streamed HMAC + decryption, then hash, Merkle
    /// root, and signature checks against the declared metadata, then the
    /// atomic rename onto the final name.
    async fn verify_and_finalize(
        &self,
        metadata: &FileMetadataMessage,
        wire_part: &Path,
        complete: &CompleteMessage,
        peer: &str,
    ) -> Result<PathBuf> {
        let plain_part = if metadata.streamed {
            let salt = metadata
                .session_salt
                .as_deref()
                .ok_or_else(|| EngineError::Protocol("streamed metadata without salt".into()))?;
            let salt = parse_session_salt(salt)?;

            let tag = complete.aggregate_tag.as_deref().ok_or_else(|| {
                EngineError::Integrity("streamed transfer completed without aggregate HMAC".into())
            })?;
            let hmac_key = self.key_manager.stream_hmac_key_for(peer, &salt).await?;
            let ciphertext = wire_part.to_owned();
            let expected = tag.to_vec();
            tokio::task::spawn_blocking(move || {
                stream::verify_ciphertext_hmac(&ciphertext, &hmac_key, &expected)
            })
            .await
            .map_err(|e| EngineError::Resource(format!("hmac task: {e}")))??;

            let key = self.key_manager.session_key_for(peer, &salt).await?;
            let nonce_salt = self.key_manager.stream_nonce_salt_for(peer, &salt).await?;
            let plain = self
                .output_dir
                .join(format!("{}.part", metadata.file_name));
            let src = wire_part.to_owned();
            let dst = plain.clone();
            tokio::task::spawn_blocking(move || stream::decrypt_file(&src, &dst, &key, &nonce_salt))
                .await
                .map_err(|e| EngineError::Resource(format!("decrypt task: {e}")))??;
            let _ = std::fs::remove_file(wire_part);
            plain
        } else {
            wire_part.to_owned()
        };

        let chunk_size = metadata.chunk_size as usize;
        let hash_path = plain_part.clone();
        let actual_hash = tokio::task::spawn_blocking(move || file_sha256_hex(&hash_path))
            .await
            .map_err(|e| EngineError::Resource(format!("hash task: {e}")))??;
        if actual_hash != metadata.file_hash {
            return Err(EngineError::Integrity(format!(
                "file hash mismatch: declared {}, computed {actual_hash}",
                metadata.file_hash
            )));
        }

        if let Some(declared_root) = &metadata.merkle_root {
            let merkle_path = plain_part.clone();
            let actual_root =
                tokio::task::spawn_blocking(move || merkle_root_hex(&merkle_path, chunk_size))
                    .await
                    .map_err(|e| EngineError::Resource(format!("merkle task: {e}")))??;
            if actual_root.as_deref() != Some(declared_root.as_str()) {
                return Err(EngineError::Integrity("merkle root mismatch".into()));
            }
        }

        if let Some(signature) = &metadata.signature {
            match (&self.verifier, &metadata.signer_id) {
                (Some(verifier), Some(signer_id)) => {
                    let sig = hex::decode(signature)
                        .map_err(|_| EngineError::Protocol("signature is not valid hex".into()))?;
                    verifier.verify(signer_id, metadata.file_hash.as_bytes(), &sig)?;
                }
                (Some(_), None) => {
                    return Err(EngineError::Protocol(
                        "signature present without signer id".into(),
                    ))
                }
                (None, _) => {
                    return Err(EngineError::Security(
                        "transfer is signed but no verifier is configured".into(),
                    ))
                }
            }
        }

        let destination = unique_destination(&self.output_dir, &metadata.file_name);
        std::fs::rename(&plain_part, &destination)?;
        Ok(destination)
    }

    fn discard(&self, metadata: &FileMetadataMessage, wire_part: &Path) {
        let _ = std::fs::remove_file(wire_part);
        let _ = std::fs::remove_file(
            self.output_dir
                .join(format!("{}.part", metadata.file_name)),
        );
        self.pending.remove(&metadata.transfer_id);
    }
}

fn validate_metadata(metadata: &FileMetadataMessage) -> Result<()> {
    if metadata.chunk_size == 0 {
        return Err(EngineError::Protocol("zero chunk size".into()));
    }
    if metadata.file_name.contains(['/', '\\']) || metadata.file_name.starts_with('.') {
        return Err(EngineError::Security(format!(
            "unsafe file name: {}",
            metadata.file_name
        )));
    }
    if metadata.streamed && !metadata.encrypted {
        return Err(EngineError::Protocol(
            "streamed transfer must be encrypted".into(),
        ));
    }
    Ok(())
}

/// First free name under `dir` for `file_name`, inserting ` (n)` before the
/// extension when the plain name is taken.
fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_owned(), Some(ext.to_owned())),
        _ => (file_name.to_owned(), None),
    };
    for n in 1u32.. {
        let name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("exhausted u32 rename candidates")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_file_names_rejected() {
        let mut metadata = FileMetadataMessage {
            transfer_id: "t".into(),
            file_name: "../etc/passwd".into(),
            file_size: 1,
            wire_size: 1,
            file_hash: "00".into(),
            merkle_root: None,
            hash_algorithm: "sha-256".into(),
            compressed: false,
            encrypted: false,
            streamed: false,
            chunk_size: 65536,
            session_salt: None,
            cipher_suite: None,
            signature: None,
            signature_algorithm: None,
            signer_id: None,
        };
        assert!(validate_metadata(&metadata).is_err());

        metadata.file_name = "report.pdf".into();
        validate_metadata(&metadata).unwrap();

        metadata.file_name = ".hidden".into();
        assert!(validate_metadata(&metadata).is_err());
    }

    #[test]
    fn unique_destination_inserts_counter() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.txt"),
            dir.path().join("a.txt")
        );

        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.txt"),
            dir.path().join("a (1).txt")
        );

        std::fs::write(dir.path().join("a (1).txt"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.txt"),
            dir.path().join("a (2).txt")
        );

        std::fs::write(dir.path().join("noext"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "noext"),
            dir.path().join("noext (1)")
        );
    }
}
