//! Background media loading
//!
//! A [`PendingLoad`] owns one decode running on its own thread. The result
//! arrives over a channel, so the control side can poll without blocking.
//! Cancelling (or dropping) the handle cancels the worker and discards its
//! late result.

use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};

use super::error::{DecodeError, DecodeResult};
use super::{CancelToken, Deadline, MediaDecoder};
use crate::types::SampleBuffer;

/// An in-flight load of a single source
pub struct PendingLoad {
    url: String,
    cancel: CancelToken,
    deadline: Deadline,
    result_rx: Receiver<DecodeResult<SampleBuffer>>,
    settled: bool,
}

impl PendingLoad {
    /// Start loading `url` on a background thread
    pub fn spawn(decoder: MediaDecoder, url: impl Into<String>) -> Self {
        let url = url.into();
        let cancel = CancelToken::new();
        let deadline = Deadline::after(decoder.config().load_timeout());
        let (result_tx, result_rx) = channel::bounded(1);

        let worker_url = url.clone();
        let worker_cancel = cancel.clone();
        thread::Builder::new()
            .name("media-loader".to_string())
            .spawn(move || {
                let result = decoder.load_until(&worker_url, &worker_cancel, deadline);
                if worker_cancel.is_cancelled() {
                    log::debug!("PendingLoad: discarding result for superseded {}", worker_url);
                    return;
                }
                // Receiver gone means the handle was dropped
                let _ = result_tx.send(result);
            })
            .expect("Failed to spawn media loader thread");

        log::debug!("PendingLoad: started {}", url);

        Self {
            url,
            cancel,
            deadline,
            result_rx,
            settled: false,
        }
    }

    /// URL being loaded
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a result has already been handed out
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Check for a result without blocking
    ///
    /// Returns `None` while the load is in flight and after the result has
    /// been taken. Once the deadline passes this reports `Timeout` even if the
    /// worker has not noticed yet.
    pub fn poll(&mut self) -> Option<DecodeResult<SampleBuffer>> {
        if self.settled {
            return None;
        }
        if self.cancel.is_cancelled() {
            return self.settle(Err(DecodeError::Cancelled));
        }

        match self.result_rx.try_recv() {
            Ok(result) => self.settle(result),
            Err(TryRecvError::Empty) if self.deadline.is_expired() => {
                log::warn!("PendingLoad: {} exceeded its load bound", self.url);
                self.cancel.cancel();
                self.settle(Err(self.deadline.timeout_error()))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::error!("PendingLoad: worker for {} exited without a result", self.url);
                self.settle(Err(DecodeError::Cancelled))
            }
        }
    }

    /// Block for up to `timeout` waiting for the result
    pub fn wait(&mut self, timeout: Duration) -> Option<DecodeResult<SampleBuffer>> {
        if self.settled {
            return None;
        }
        let budget = timeout.min(self.deadline.remaining());
        match self.result_rx.recv_timeout(budget) {
            Ok(result) => self.settle(result),
            Err(RecvTimeoutError::Timeout) => self.poll(),
            Err(RecvTimeoutError::Disconnected) => self.poll(),
        }
    }

    /// Cancel the load; any late result is discarded
    pub fn cancel(&mut self) {
        if !self.settled {
            log::debug!("PendingLoad: cancelling {}", self.url);
        }
        self.cancel.cancel();
    }

    fn settle(
        &mut self,
        result: DecodeResult<SampleBuffer>,
    ) -> Option<DecodeResult<SampleBuffer>> {
        self.settled = true;
        Some(result)
    }
}

impl Drop for PendingLoad {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
