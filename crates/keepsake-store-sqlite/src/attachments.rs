//! [`FsAttachmentStore`]: attachment bytes written as files in one directory.

use std::path::{Path, PathBuf};

use chrono::Utc;
use keepsake_core::{
  attachment::AttachmentSink,
  memory::{Attachment, AttachmentKind},
};
use uuid::Uuid;

use crate::{Error, Result};

/// Suffix of a file still being written.
const PARTIAL_SUFFIX: &str = ".part";

/// Writes each attachment to `<dir>/<uuid>.<ext>`. The returned
/// [`Attachment`] records the bare file name, not the full path.
///
/// Bytes go to `<uuid>.<ext>.part` first and are renamed into place, so a
/// finished name never refers to a half-written file.
#[derive(Debug, Clone)]
pub struct FsAttachmentStore {
  dir: PathBuf,
}

/// Removes a partial file unless the write completed.
struct PartialFile {
  path: Option<PathBuf>,
}

impl PartialFile {
  fn finish(mut self) { self.path = None; }
}

impl Drop for PartialFile {
  fn drop(&mut self) {
    if let Some(path) = self.path.take() {
      let _ = std::fs::remove_file(path);
    }
  }
}

impl FsAttachmentStore {
  /// Use `dir` as the attachment area, creating it if needed. Partial files
  /// left by an earlier run are removed.
  pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref().to_path_buf();
    tokio::fs::create_dir_all(&dir).await?;

    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
      if entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX) {
        tracing::debug!(path = ?entry.path(), "removing partial attachment");
        tokio::fs::remove_file(entry.path()).await?;
      }
    }
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path { &self.dir }

  /// Full path of a stored attachment.
  pub fn path_of(&self, attachment: &Attachment) -> PathBuf { self.dir.join(&attachment.reference) }
}

impl AttachmentSink for FsAttachmentStore {
  type Error = Error;

  async fn save(&self, kind: AttachmentKind, bytes: Vec<u8>) -> Result<Attachment> {
    let attachment_id = Uuid::new_v4();
    let reference = format!("{attachment_id}.{}", kind.extension());
    let path = self.dir.join(&reference);
    let partial_path = self.dir.join(format!("{reference}{PARTIAL_SUFFIX}"));

    let partial = PartialFile { path: Some(partial_path.clone()) };
    tokio::fs::write(&partial_path, &bytes).await?;
    tokio::fs::rename(&partial_path, &path).await?;
    partial.finish();
    tracing::debug!(%attachment_id, size = bytes.len(), "attachment written");

    Ok(Attachment { attachment_id, kind, reference, created_at: Utc::now() })
  }

  async fn discard(&self, attachment: &Attachment) -> Result<()> {
    match tokio::fs::remove_file(self.path_of(attachment)).await {
      Ok(()) => {
        tracing::debug!(attachment_id = %attachment.attachment_id, "attachment discarded");
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}
