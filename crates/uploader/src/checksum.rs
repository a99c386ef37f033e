//! Checksum verification with automatic repair of mismatched slices.

use sliceup_transfer::checksum_bytes;

use crate::uploader::{header_for, read_slice};
use crate::{CheckReport, UploadError, Uploader};

impl Uploader {
    /// Compares the server's slice hashes with the local file.
    ///
    /// Only slices the server reports as uploaded are compared. A
    /// mismatched slice is uploaded again; if that fails the slice is
    /// marked pending locally and the whole check fails with
    /// [`UploadError::ChecksumFailed`].
    pub async fn verify(&mut self) -> Result<CheckReport, UploadError> {
        let file_id = self
            .meta
            .as_ref()
            .map(|m| m.file_id.clone())
            .ok_or(UploadError::NoSession)?;
        let remote = self.transport.get_session_meta(&file_id).await?;

        let mut report = CheckReport::default();
        for index in 0..remote.slice_count() {
            let Some(slice) = remote.slice(index) else {
                continue;
            };
            if !slice.is_uploaded() {
                report.pending.push(index);
                continue;
            }

            let data = read_slice(&self.path, remote.chunk_size, index).await?;
            if checksum_bytes(&data) == slice.sha1 {
                report.matched.push(index);
                continue;
            }

            tracing::warn!(%file_id, slice = index, "checksum mismatch, uploading again");
            match self
                .transport
                .upload_slice(&header_for(&remote, index), &data)
                .await
            {
                Ok(ack) => {
                    if let Some(meta) = self.meta.as_mut() {
                        meta.mark_uploaded(index, ack.sha1);
                    }
                    report.repaired.push(index);
                }
                Err(e) => {
                    tracing::error!(%file_id, slice = index, error = %e, "repair failed");
                    if let Some(meta) = self.meta.as_mut() {
                        meta.mark_pending(index);
                    }
                    self.save_local().await?;
                    return Err(UploadError::ChecksumFailed { slice_id: index });
                }
            }
        }

        if !report.repaired.is_empty() {
            self.save_local().await?;
        }
        tracing::info!(
            %file_id,
            matched = report.matched.len(),
            repaired = report.repaired.len(),
            pending = report.pending.len(),
            "checksum verification finished"
        );
        Ok(report)
    }
}
