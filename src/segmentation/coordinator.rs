// SPDX-License-Identifier: GPL-3.0-only

//! Fire-and-forget segmentation with a latest-wins result slot
//!
//! At most one request is in flight. Frames that arrive while a request is
//! outstanding are not queued; rendering uses whatever result completed last.

use super::{SegmentationEngine, SegmentationEngineLoader, SegmentationMasks, SegmenterOptions};
use crate::media::Picture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of the segmentation engine as seen by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationStatus {
    /// The engine is still being loaded
    Loading,
    /// Loaded, but its output is not trusted until the warm-up elapses
    WarmingUp,
    Ready,
    /// Loading failed; compositing stays in pass-through mode
    Unavailable,
    Closed,
}

enum EngineSlot {
    Loading,
    Loaded {
        engine: Arc<dyn SegmentationEngine>,
        ready_at: Instant,
    },
    Failed,
    Closed,
}

struct Shared {
    warmup: Duration,
    engine: Mutex<EngineSlot>,
    latest: Mutex<Option<Arc<SegmentationMasks>>>,
    in_flight: AtomicBool,
    started: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    completed: watch::Sender<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the engine, the in-flight guard and the latest result
#[derive(Clone)]
pub struct SegmentationCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SegmentationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationCoordinator")
            .field("status", &self.status())
            .field("started", &self.requests_started())
            .field("completed", &self.requests_completed())
            .finish()
    }
}

impl SegmentationCoordinator {
    pub fn new(warmup: Duration) -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                warmup,
                engine: Mutex::new(EngineSlot::Loading),
                latest: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                started: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                completed,
            }),
        }
    }

    /// Load the engine in the background
    ///
    /// Failures are logged and leave the coordinator unavailable.
    pub fn spawn_load(
        &self,
        runtime: &Handle,
        loader: Arc<dyn SegmentationEngineLoader>,
        options: SegmenterOptions,
    ) -> JoinHandle<()> {
        let coordinator = self.clone();
        runtime.spawn(async move {
            let model_path = options.model_path.clone();
            match loader.load(options).await {
                Ok(engine) => coordinator.install(engine),
                Err(e) => {
                    warn!(model = %model_path, error = %e, "Segmentation engine failed to load, continuing without segmentation");
                    let mut slot = lock(&coordinator.shared.engine);
                    if !matches!(*slot, EngineSlot::Closed) {
                        *slot = EngineSlot::Failed;
                    }
                }
            }
        })
    }

    /// Install a loaded engine; its output is trusted after the warm-up
    pub fn install(&self, engine: Arc<dyn SegmentationEngine>) {
        let mut slot = lock(&self.shared.engine);
        if matches!(*slot, EngineSlot::Closed) {
            engine.close();
            return;
        }
        let ready_at = Instant::now() + self.shared.warmup;
        *slot = EngineSlot::Loaded { engine, ready_at };
        info!(
            warmup_ms = self.shared.warmup.as_millis() as u64,
            "Segmentation engine loaded"
        );
    }

    pub fn status(&self) -> SegmentationStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> SegmentationStatus {
        match &*lock(&self.shared.engine) {
            EngineSlot::Loading => SegmentationStatus::Loading,
            EngineSlot::Loaded { ready_at, .. } if now < *ready_at => SegmentationStatus::WarmingUp,
            EngineSlot::Loaded { .. } => SegmentationStatus::Ready,
            EngineSlot::Failed => SegmentationStatus::Unavailable,
            EngineSlot::Closed => SegmentationStatus::Closed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == SegmentationStatus::Ready
    }

    fn ready_engine(&self, now: Instant) -> Option<Arc<dyn SegmentationEngine>> {
        match &*lock(&self.shared.engine) {
            EngineSlot::Loaded { engine, ready_at } if now >= *ready_at => Some(Arc::clone(engine)),
            _ => None,
        }
    }

    /// Start segmenting `picture` unless a request is already running
    ///
    /// Returns true if a request was started. Never waits for the result.
    pub fn request(&self, runtime: &Handle, picture: Picture, timestamp_us: u64) -> bool {
        let Some(engine) = self.ready_engine(Instant::now()) else {
            return false;
        };
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            self.shared.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.shared.started.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        let pending = engine.segment_for_video(picture, timestamp_us);
        runtime.spawn(async move {
            let result = pending.await;
            let closed = matches!(*lock(&shared.engine), EngineSlot::Closed);
            match result {
                Ok(masks) if !closed => {
                    *lock(&shared.latest) = Some(Arc::new(masks));
                }
                Ok(_) => debug!(timestamp_us, "Dropping segmentation result after close"),
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(timestamp_us, error = %e, "Segmentation request failed");
                }
            }
            shared.in_flight.store(false, Ordering::Release);
            shared.completed.send_modify(|count| *count += 1);
        });
        true
    }

    /// Most recently completed masks
    pub fn latest(&self) -> Option<Arc<SegmentationMasks>> {
        lock(&self.shared.latest).clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn requests_started(&self) -> u64 {
        self.shared.started.load(Ordering::Relaxed)
    }

    /// Requests finished, successfully or not
    pub fn requests_completed(&self) -> u64 {
        *self.shared.completed.borrow()
    }

    /// Frames not sent because a request was still running
    pub fn requests_skipped(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Wait until at least `count` requests have finished
    pub async fn wait_for_completed(&self, count: u64) {
        let mut completed = self.shared.completed.subscribe();
        // The sender lives in `shared`, which outlives this borrow
        let _ = completed.wait_for(|done| *done >= count).await;
    }

    /// Close the engine and drop the latest result; idempotent
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *lock(&self.shared.engine), EngineSlot::Closed);
        if let EngineSlot::Loaded { engine, .. } = previous {
            engine.close();
            debug!("Segmentation engine closed");
        }
        lock(&self.shared.latest).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FilterResult;
    use crate::renderers::texture::MaskImage;
    use futures::future::BoxFuture;
    use image::RgbaImage;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    /// Engine whose requests finish only when a permit is released
    struct GatedEngine {
        gate: Arc<Semaphore>,
        calls: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl SegmentationEngine for GatedEngine {
        fn segment_for_video(
            &self,
            _picture: Picture,
            timestamp_us: u64,
        ) -> BoxFuture<'static, FilterResult<SegmentationMasks>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&self.gate);
            Box::pin(async move {
                let _permit = gate.acquire().await;
                SegmentationMasks::new(MaskImage::new(2, 2), MaskImage::new(2, 2), timestamp_us)
            })
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn picture() -> Picture {
        Arc::new(RgbaImage::new(2, 2))
    }

    fn gated() -> (GatedEngine, Arc<Semaphore>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let engine = GatedEngine {
            gate: Arc::clone(&gate),
            calls: Arc::clone(&calls),
            closed: Arc::clone(&closed),
        };
        (engine, gate, calls, closed)
    }

    #[tokio::test]
    async fn test_not_ready_during_warmup() {
        let coordinator = SegmentationCoordinator::new(Duration::from_secs(60));
        assert_eq!(coordinator.status(), SegmentationStatus::Loading);

        let (engine, _, calls, _) = gated();
        coordinator.install(Arc::new(engine));
        assert_eq!(coordinator.status(), SegmentationStatus::WarmingUp);
        assert!(!coordinator.request(&Handle::current(), picture(), 0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            coordinator.status_at(Instant::now() + Duration::from_secs(61)),
            SegmentationStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_only_one_request_in_flight() {
        let coordinator = SegmentationCoordinator::new(Duration::ZERO);
        let (engine, gate, calls, _) = gated();
        coordinator.install(Arc::new(engine));
        let runtime = Handle::current();

        assert!(coordinator.request(&runtime, picture(), 1));
        assert!(!coordinator.request(&runtime, picture(), 2));
        assert!(!coordinator.request(&runtime, picture(), 3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.requests_skipped(), 2);

        gate.add_permits(1);
        coordinator.wait_for_completed(1).await;
        assert_eq!(coordinator.latest().map(|m| m.timestamp_us), Some(1));
        assert!(!coordinator.is_in_flight());

        assert!(coordinator.request(&runtime, picture(), 4));
        gate.add_permits(1);
        coordinator.wait_for_completed(2).await;
        assert_eq!(coordinator.latest().map(|m| m.timestamp_us), Some(4));
    }

    #[tokio::test]
    async fn test_close_releases_engine_and_result() {
        let coordinator = SegmentationCoordinator::new(Duration::ZERO);
        let (engine, gate, _, closed) = gated();
        coordinator.install(Arc::new(engine));
        gate.add_permits(1);
        coordinator.request(&Handle::current(), picture(), 1);
        coordinator.wait_for_completed(1).await;
        assert!(coordinator.latest().is_some());

        coordinator.close();
        coordinator.close();
        assert!(closed.load(Ordering::SeqCst));
        assert!(coordinator.latest().is_none());
        assert_eq!(coordinator.status(), SegmentationStatus::Closed);
        assert!(!coordinator.request(&Handle::current(), picture(), 2));
    }

    #[tokio::test]
    async fn test_load_failure_leaves_unavailable() {
        let coordinator = SegmentationCoordinator::new(Duration::ZERO);
        let options = SegmenterOptions {
            model_path: "missing.tflite".into(),
            selfie_mode: true,
        };
        coordinator
            .spawn_load(&Handle::current(), Arc::new(super::super::UnavailableLoader), options)
            .await
            .unwrap();
        assert_eq!(coordinator.status(), SegmentationStatus::Unavailable);
        assert!(!coordinator.request(&Handle::current(), picture(), 0));
    }
}
