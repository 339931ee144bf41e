// SPDX-License-Identifier: GPL-3.0-only

//! Dedicated frame-pacing timer
//!
//! Frame pacing in the polyfill source must not depend on how busy the async
//! runtime is, so deadlines are slept on a thread of their own and completion
//! is signalled back through a oneshot channel.

use crate::errors::{FilterError, FilterResult};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info};

struct TimerRequest {
    deadline: Instant,
    done: oneshot::Sender<()>,
}

/// Timer service backed by its own thread
pub struct FrameTimer {
    requests: Option<mpsc::Sender<TimerRequest>>,
    thread_handle: Option<JoinHandle<()>>,
    name: String,
}

impl FrameTimer {
    /// Spawn the timer thread
    pub fn spawn(name: &str) -> FilterResult<Self> {
        let (requests, inbox) = mpsc::channel::<TimerRequest>();
        let name_clone = name.to_string();

        let thread_handle = thread::Builder::new()
            .name(format!("{}-timer", name))
            .spawn(move || {
                debug!(name = %name_clone, "Frame timer thread started");
                // Ends when every sender has been dropped
                while let Ok(request) = inbox.recv() {
                    let now = Instant::now();
                    if request.deadline > now {
                        thread::sleep(request.deadline - now);
                    }
                    let _ = request.done.send(());
                }
                debug!(name = %name_clone, "Frame timer thread exiting");
            })
            .map_err(|e| FilterError::Other(format!("Failed to spawn timer thread: {}", e)))?;

        info!(name = %name, "Frame timer started");

        Ok(Self {
            requests: Some(requests),
            thread_handle: Some(thread_handle),
            name: name.to_string(),
        })
    }

    /// Wait until `deadline` has passed
    pub async fn sleep_until(&self, deadline: Instant) -> FilterResult<()> {
        if deadline <= Instant::now() {
            return Ok(());
        }

        let requests = self.requests.as_ref().ok_or(FilterError::Aborted)?;
        let (done, wait) = oneshot::channel();
        requests
            .send(TimerRequest { deadline, done })
            .map_err(|_| FilterError::Aborted)?;
        wait.await.map_err(|_| FilterError::Aborted)
    }

    pub fn is_running(&self) -> bool {
        self.requests.is_some()
    }

    /// Stop the timer thread and wait for it to exit
    pub fn shutdown(&mut self) {
        if self.requests.take().is_none() {
            return;
        }
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            debug!(name = %self.name, "Frame timer thread panicked");
        }
        info!(name = %self.name, "Frame timer stopped");
    }
}

impl Drop for FrameTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sleep_until_waits_for_deadline() {
        let timer = FrameTimer::spawn("test").unwrap();
        let start = Instant::now();
        timer
            .sleep_until(start + Duration::from_millis(20))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut timer = FrameTimer::spawn("test").unwrap();
        timer.shutdown();
        timer.shutdown();
        assert!(!timer.is_running());

        let deadline = Instant::now() + Duration::from_millis(5);
        assert_eq!(
            timer.sleep_until(deadline).await,
            Err(FilterError::Aborted)
        );
    }
}
