//! Timeout and cancellation for remote-bound calls.
//!
//! Every operation that touches the backing store takes a [`CallOptions`].
//! The wrapped future is dropped when the deadline passes or the paired
//! [`CancelHandle`] fires; nothing is retried.

use std::{future::Future, time::Duration};

use tokio::sync::watch;

use crate::{Error, Result};

/// Create a linked cancel handle and token.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx }, CancelToken { rx })
}

/// The owning half; call [`CancelHandle::cancel`] to abort in-flight calls.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn cancel(&self) { self.tx.send_replace(true); }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
  rx: watch::Receiver<bool>,
}

impl CancelToken {
  pub fn is_cancelled(&self) -> bool { *self.rx.borrow() }

  /// Resolves once cancelled. Never resolves if the handle is dropped first.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
  pub timeout: Option<Duration>,
  pub cancel:  Option<CancelToken>,
}

impl CallOptions {
  pub fn with_timeout(timeout: Duration) -> Self {
    Self { timeout: Some(timeout), cancel: None }
  }

  pub fn cancellable(mut self, token: CancelToken) -> Self {
    self.cancel = Some(token);
    self
  }

  /// Run `fut` under these options, returning its raw output.
  pub async fn guard<F>(&self, operation: &'static str, fut: F) -> Result<F::Output>
  where
    F: Future,
  {
    let bounded = async {
      match self.timeout {
        Some(after) => tokio::time::timeout(after, fut)
          .await
          .map_err(|_| Error::TimedOut { operation, after, step: None }),
        None => Ok(fut.await),
      }
    };

    match &self.cancel {
      Some(token) => {
        if token.is_cancelled() {
          return Err(Error::Cancelled { operation, step: None });
        }
        tokio::select! {
          biased;
          _ = token.cancelled() => Err(Error::Cancelled { operation, step: None }),
          out = bounded => out,
        }
      }
      None => bounded.await,
    }
  }

  /// Run a store call, mapping its error into [`Error::Remote`].
  pub async fn run<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T>
  where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
  {
    self
      .guard(operation, fut)
      .await?
      .map_err(|e| Error::remote(operation, e))
  }
}
