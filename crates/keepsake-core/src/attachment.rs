//! Bounded, concurrent attachment persistence.
//!
//! All uploads for a memory are saved in parallel with one shared deadline.
//! Whatever finished in time is kept; late or failed uploads are dropped and
//! counted, and the memory is created anyway.

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::memory::{Attachment, AttachmentKind};

pub const DEFAULT_ATTACHMENT_WAIT: Duration = Duration::from_secs(15);

/// Raw attachment bytes waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentUpload {
  pub kind:  AttachmentKind,
  pub bytes: Vec<u8>,
}

/// An app-private area attachments are written into.
pub trait AttachmentSink: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Store `bytes` and return the attachment record pointing at them.
  fn save(
    &self,
    kind: AttachmentKind,
    bytes: Vec<u8>,
  ) -> impl Future<Output = Result<Attachment, Self::Error>> + Send;

  /// Delete a previously saved attachment. Deleting one that is already
  /// gone succeeds.
  fn discard(&self, attachment: &Attachment) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentBatch {
  /// Saved attachments, in upload order.
  pub saved:     Vec<Attachment>,
  pub failed:    usize,
  pub timed_out: usize,
}

impl AttachmentBatch {
  pub fn is_complete(&self) -> bool { self.failed == 0 && self.timed_out == 0 }
}

/// Save every upload concurrently, waiting at most `wait` in total.
pub async fn persist_attachments<A: AttachmentSink>(
  sink: Arc<A>,
  uploads: Vec<AttachmentUpload>,
  wait: Duration,
) -> AttachmentBatch {
  let total = uploads.len();
  let mut tasks = JoinSet::new();
  for (index, upload) in uploads.into_iter().enumerate() {
    let sink = Arc::clone(&sink);
    tasks.spawn(async move { (index, sink.save(upload.kind, upload.bytes).await) });
  }

  let deadline = tokio::time::Instant::now() + wait;
  let mut saved = Vec::with_capacity(total);
  let mut failed = 0;

  loop {
    match tokio::time::timeout_at(deadline, tasks.join_next()).await {
      Ok(Some(Ok((index, Ok(attachment))))) => saved.push((index, attachment)),
      Ok(Some(Ok((index, Err(error))))) => {
        tracing::warn!(index, %error, "attachment save failed");
        failed += 1;
      }
      Ok(Some(Err(error))) => {
        tracing::warn!(%error, "attachment task did not complete");
        failed += 1;
      }
      Ok(None) => break,
      Err(_) => {
        tracing::warn!(
          pending = tasks.len(),
          wait_secs = wait.as_secs(),
          "attachment wait elapsed; keeping what finished"
        );
        tasks.abort_all();
        break;
      }
    }
  }

  saved.sort_by_key(|(index, _)| *index);
  AttachmentBatch {
    timed_out: total - saved.len() - failed,
    saved: saved.into_iter().map(|(_, a)| a).collect(),
    failed,
  }
}

/// Delete attachments whose memory was never written. Failures are logged
/// and skipped.
pub async fn discard_attachments<A: AttachmentSink>(sink: &A, attachments: &[Attachment]) {
  for attachment in attachments {
    if let Err(error) = sink.discard(attachment).await {
      tracing::warn!(
        attachment_id = %attachment.attachment_id,
        %error,
        "could not discard orphaned attachment"
      );
    }
  }
}
