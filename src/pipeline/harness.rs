// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline harness: frame source → effect transform → frame sink
//!
//! `start()` initializes the effect synchronously and returns the output track
//! right away; frames are then moved through the effect by a task on the tokio
//! runtime, with each transform running on the blocking pool. The next frame
//! is not pulled until the current one has been transformed and handed to the
//! sink.

use super::stats::StatsWindow;
use super::{EffectContext, PipelineHooks, VideoEffect};
use crate::backends::{FrameSink, FrameSource, StreamingCapabilities, VideoTrack};
use crate::constants::{DEFAULT_TRACK_HEIGHT, DEFAULT_TRACK_WIDTH};
use crate::errors::{FilterError, FilterResult};
use crate::media::{Frame, FrameLedger, RenderSurface};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Frames processed across all pipelines, for sampled debug logging
static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

struct EffectSlot {
    effect: Box<dyn VideoEffect>,
    stopped: bool,
}

type SharedEffect = Arc<Mutex<EffectSlot>>;

fn lock_effect(effect: &SharedEffect) -> MutexGuard<'_, EffectSlot> {
    effect.lock().unwrap_or_else(PoisonError::into_inner)
}

enum PipelineState {
    Idle,
    Running {
        output: VideoTrack,
        task: Option<JoinHandle<()>>,
    },
    Stopped {
        task: Option<JoinHandle<()>>,
    },
}

/// Drives one effect over one input track
pub struct VideoFilterPipeline {
    name: &'static str,
    track: VideoTrack,
    effect: SharedEffect,
    hooks: PipelineHooks,
    capabilities: Option<StreamingCapabilities>,
    ledger: FrameLedger,
    cancel: watch::Sender<bool>,
    state: PipelineState,
}

impl VideoFilterPipeline {
    pub fn new(track: VideoTrack, effect: Box<dyn VideoEffect>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            name: effect.name(),
            track,
            effect: Arc::new(Mutex::new(EffectSlot {
                effect,
                stopped: false,
            })),
            hooks: PipelineHooks::default(),
            capabilities: None,
            ledger: FrameLedger::new(),
            cancel,
            state: PipelineState::Idle,
        }
    }

    pub fn with_hooks(mut self, hooks: PipelineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use fixed capabilities instead of probing the host at start
    pub fn with_capabilities(mut self, capabilities: StreamingCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Ledger of frames created by this pipeline's source
    pub fn ledger(&self) -> &FrameLedger {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        matches!(
            &self.state,
            PipelineState::Running { task: Some(task), .. } if !task.is_finished()
        )
    }

    /// Output track, once started
    pub fn output(&self) -> Option<VideoTrack> {
        match &self.state {
            PipelineState::Running { output, .. } => Some(output.clone()),
            _ => None,
        }
    }

    /// Initialize the effect and start moving frames
    ///
    /// Must be called from within a tokio runtime. Initialization failures are
    /// returned here and leave the pipeline idle.
    pub fn start(&mut self) -> FilterResult<VideoTrack> {
        match self.state {
            PipelineState::Idle => {}
            PipelineState::Running { .. } => {
                return Err(FilterError::InvalidState("pipeline already started".into()));
            }
            PipelineState::Stopped { .. } => {
                return Err(FilterError::InvalidState("pipeline has been stopped".into()));
            }
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            FilterError::UnsupportedContext(format!("no async runtime available: {}", e))
        })?;

        let settings = self.track.settings();
        let width = settings.width.unwrap_or(DEFAULT_TRACK_WIDTH);
        let height = settings.height.unwrap_or(DEFAULT_TRACK_HEIGHT);

        info!(effect = self.name, width, height, "Starting video filter pipeline");

        let surface = RenderSurface::new(width, height);
        {
            let mut slot = lock_effect(&self.effect);
            let context = EffectContext {
                width,
                height,
                runtime: runtime.clone(),
            };
            if let Err(e) = slot.effect.initialize(&context) {
                error!(effect = self.name, error = %e, "Effect initialization failed");
                return Err(e);
            }
        }

        let capabilities = self
            .capabilities
            .unwrap_or_else(StreamingCapabilities::detect);
        let source = capabilities.create_source(&self.track, &self.ledger)?;
        let sink = capabilities.create_sink(&self.track, &format!("{}-output", self.name));
        let output = sink.track();

        info!(
            effect = self.name,
            source = %source.kind(),
            sink = %sink.kind(),
            "Video filter pipeline connected"
        );

        let task = runtime.spawn(run_frames(
            self.name,
            source,
            sink,
            surface,
            Arc::clone(&self.effect),
            self.hooks.clone(),
            self.cancel.subscribe(),
        ));

        self.state = PipelineState::Running {
            output: output.clone(),
            task: Some(task),
        };
        Ok(output)
    }

    /// Cancel processing, stop the output track and release effect resources
    ///
    /// Safe to call any number of times, before or after `start()`.
    pub fn stop(&mut self) {
        self.cancel.send_replace(true);

        let task = match std::mem::replace(&mut self.state, PipelineState::Stopped { task: None }) {
            PipelineState::Running { output, task } => {
                info!(effect = self.name, "Stopping video filter pipeline");
                output.stop();
                task
            }
            PipelineState::Stopped { task } => task,
            PipelineState::Idle => None,
        };
        self.state = PipelineState::Stopped { task };

        let mut slot = lock_effect(&self.effect);
        if !slot.stopped {
            slot.stopped = true;
            slot.effect.on_stop();
            debug!(effect = self.name, "Effect resources released");
        }
    }

    /// Wait for the frame task to finish
    pub async fn closed(&mut self) {
        let task = match &mut self.state {
            PipelineState::Running { task, .. } | PipelineState::Stopped { task } => task.take(),
            PipelineState::Idle => None,
        };
        if let Some(task) = task
            && let Err(e) = task.await
            && e.is_panic()
        {
            error!(effect = self.name, "Video filter task panicked");
        }
    }
}

impl Drop for VideoFilterPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender means the pipeline itself is gone
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

/// Run one transform; `None` once the effect has been stopped
fn transform_frame(
    effect: &SharedEffect,
    frame: &Frame,
    surface: &mut RenderSurface,
) -> Option<(FilterResult<Frame>, Duration)> {
    let mut slot = lock_effect(effect);
    if slot.stopped {
        return None;
    }
    surface.ensure_size(frame.display_width(), frame.display_height());
    let started = Instant::now();
    let result = slot.effect.transform(frame, surface);
    Some((result, started.elapsed()))
}

async fn run_frames(
    name: &'static str,
    source: Box<dyn FrameSource>,
    mut sink: Box<dyn FrameSink>,
    mut surface: RenderSurface,
    effect: SharedEffect,
    hooks: PipelineHooks,
    mut cancel: watch::Receiver<bool>,
) {
    let mut frames = source.into_stream();
    let mut stats = StatsWindow::new(Instant::now());

    loop {
        let next = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => None,
            frame = frames.next() => frame,
        };
        let Some(frame) = next else {
            break;
        };

        if *cancel.borrow() {
            frame.close();
            break;
        }

        // Transforms block on CPU work or GPU readback; keep them off the async workers
        let job_effect = Arc::clone(&effect);
        let job = tokio::task::spawn_blocking(move || {
            let outcome = transform_frame(&job_effect, &frame, &mut surface);
            frame.close();
            (outcome, surface)
        });
        let outcome = match job.await {
            Ok((outcome, returned)) => {
                surface = returned;
                outcome
            }
            Err(e) => {
                error!(effect = name, error = %e, "Transform task panicked");
                hooks.emit_error(&FilterError::Transform(format!("transform task failed: {e}")));
                break;
            }
        };
        let Some((result, delay)) = outcome else {
            break;
        };

        let output = match result {
            Ok(output) => output,
            Err(e) if e.is_expected_shutdown() => {
                debug!(effect = name, error = %e, "Transform skipped during shutdown");
                continue;
            }
            Err(e) => {
                warn!(effect = name, error = %e, "Frame transform failed");
                hooks.emit_error(&e);
                continue;
            }
        };

        if let Some(window) = stats.record(delay, Instant::now()) {
            hooks.emit_stats(&window);
        }

        let count = FRAME_COUNTER.fetch_add(1, Ordering::Relaxed);
        if count % 100 == 0 {
            debug!(
                effect = name,
                frame = count,
                width = surface.width(),
                height = surface.height(),
                delay_us = delay.as_micros() as u64,
                "Processed frame"
            );
        }

        if let Err(e) = sink.write(output).await {
            if e.is_expected_shutdown() || *cancel.borrow() {
                debug!(effect = name, error = %e, "Output closed");
            } else {
                error!(effect = name, error = %e, "Failed to write processed frame");
                hooks.emit_error(&e);
            }
            break;
        }
    }

    drop(frames);
    sink.close();
    info!(effect = name, "Video filter pipeline finished");
}
