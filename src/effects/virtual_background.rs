// SPDX-License-Identifier: GPL-3.0-only

//! Virtual background effect
//!
//! Segmentation runs beside the frame loop: each frame may start one request
//! if none is running, and rendering always uses the latest finished masks.
//! Until the engine has loaded and warmed up, frames pass through unchanged.

use crate::backgrounds::{AssetFetcher, BackgroundAsset, BackgroundLoader, BackgroundSource};
use crate::config::{BackgroundBlurLevel, BlurSettings, VirtualBackgroundConfig};
use crate::constants::compositor::DEFAULT_BACKGROUND_COLOR;
use crate::errors::{FilterError, FilterResult};
use crate::media::{Frame, RenderSurface};
use crate::pipeline::{EffectContext, VideoEffect};
use crate::renderers::{CompositeRequest, CompositorRenderer, create_compositor_renderer};
use crate::segmentation::{
    SegmentationCoordinator, SegmentationEngineLoader, SegmentationStatus, SegmenterOptions,
    UnavailableLoader,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the effect and its handles
struct Shared {
    backgrounds: BackgroundLoader,
    background: Mutex<Option<Arc<BackgroundAsset>>>,
    blur: Mutex<BlurSettings>,
    /// Bumped for every background request; stale loads are discarded
    generation: AtomicU64,
    /// Background loads finished, successfully or not
    loads: watch::Sender<u64>,
    active_identifier: Mutex<Option<String>>,
    frames_processed: AtomicU64,
    frames_composited: AtomicU64,
}

impl Shared {
    fn install(&self, generation: u64, asset: BackgroundAsset) {
        if self.generation.load(Ordering::Acquire) == generation {
            *lock(&self.background) = Some(Arc::new(asset));
        } else {
            debug!(identifier = asset.identifier(), "Discarding superseded background");
        }
        self.loads.send_modify(|count| *count += 1);
    }

    /// Load `source` and make it the active background
    ///
    /// On failure the default color is installed and the error returned.
    async fn load_background(&self, source: BackgroundSource) -> FilterResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        match self.backgrounds.load(&source).await {
            Ok(asset) => {
                self.install(generation, asset);
                Ok(())
            }
            Err(e) => {
                warn!(
                    background = %source.identifier(),
                    error = %e,
                    "Background failed to load, using default color"
                );
                self.install(generation, BackgroundAsset::color(DEFAULT_BACKGROUND_COLOR));
                Err(e)
            }
        }
    }
}

/// Replaces or blurs everything behind the person
pub struct VirtualBackground {
    config: VirtualBackgroundConfig,
    selfie_mode: bool,
    segmenter: Arc<dyn SegmentationEngineLoader>,
    coordinator: SegmentationCoordinator,
    shared: Arc<Shared>,
    compositor: Option<Box<dyn CompositorRenderer>>,
    runtime: Option<Handle>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for VirtualBackground {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualBackground")
            .field("config", &self.config)
            .field("segmentation", &self.coordinator.status())
            .field(
                "backend",
                &self.compositor.as_ref().map(|compositor| compositor.backend_name()),
            )
            .finish()
    }
}

impl VirtualBackground {
    /// Effect without a segmentation engine until [`with_segmenter`](Self::with_segmenter)
    pub fn new(config: VirtualBackgroundConfig) -> Self {
        let (loads, _) = watch::channel(0);
        Self {
            selfie_mode: config.is_selfie_mode(),
            segmenter: Arc::new(UnavailableLoader),
            coordinator: SegmentationCoordinator::new(config.segmentation_warmup()),
            shared: Arc::new(Shared {
                backgrounds: BackgroundLoader::default(),
                background: Mutex::new(None),
                blur: Mutex::new(config.blur_settings()),
                generation: AtomicU64::new(0),
                loads,
                active_identifier: Mutex::new(None),
                frames_processed: AtomicU64::new(0),
                frames_composited: AtomicU64::new(0),
            }),
            compositor: None,
            runtime: None,
            tasks: Vec::new(),
            config,
        }
    }

    pub fn with_segmenter(mut self, loader: Arc<dyn SegmentationEngineLoader>) -> Self {
        self.segmenter = loader;
        self
    }

    /// Fetch background assets with `fetcher` instead of the built-in file and HTTP fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.backgrounds = BackgroundLoader::new(fetcher);
        } else {
            warn!("Background fetcher not replaced: effect handles already exist");
        }
        self
    }

    /// Handle for inspecting and steering the running effect
    pub fn handle(&self) -> VirtualBackgroundHandle {
        VirtualBackgroundHandle {
            shared: Arc::clone(&self.shared),
            coordinator: self.coordinator.clone(),
        }
    }

    pub fn selfie_mode(&self) -> bool {
        self.selfie_mode
    }
}

impl VideoEffect for VirtualBackground {
    fn name(&self) -> &'static str {
        "virtual-background"
    }

    fn initialize(&mut self, context: &EffectContext) -> FilterResult<()> {
        let compositor = create_compositor_renderer(self.config.backend)?;
        info!(
            backend = compositor.backend_name(),
            filter = ?self.config.background_filter,
            selfie_mode = self.selfie_mode,
            width = context.width,
            height = context.height,
            "Virtual background initialized"
        );
        self.compositor = Some(compositor);

        let options = SegmenterOptions::from_config(&self.config);
        self.tasks.push(self.coordinator.spawn_load(
            &context.runtime,
            Arc::clone(&self.segmenter),
            options,
        ));

        let source = match self.config.missing_background_key() {
            Some(key) => {
                warn!(
                    filter = ?self.config.background_filter,
                    key,
                    "Background filter has no asset configured, using default color"
                );
                Some(BackgroundSource::default())
            }
            None => BackgroundSource::from_config(&self.config),
        };
        if let Some(source) = source {
            let shared = Arc::clone(&self.shared);
            self.tasks.push(context.runtime.spawn(async move {
                // Failures are logged and replaced by the default color
                let _ = shared.load_background(source).await;
            }));
        }

        self.runtime = Some(context.runtime.clone());
        Ok(())
    }

    fn transform(&mut self, frame: &Frame, surface: &mut RenderSurface) -> FilterResult<Frame> {
        let (Some(compositor), Some(runtime)) = (self.compositor.as_mut(), self.runtime.as_ref())
        else {
            return Err(FilterError::InvalidState(
                "virtual background is not running".into(),
            ));
        };

        let masks = if self.coordinator.is_ready() {
            self.coordinator
                .request(runtime, frame.picture().clone(), frame.timestamp_us());
            self.coordinator.latest()
        } else {
            None
        };

        let background = lock(&self.shared.background).clone();
        let blur = *lock(&self.shared.blur);
        let request = CompositeRequest {
            frame,
            masks: masks.as_deref(),
            background: background.as_ref().map(|asset| asset.layer_at(Instant::now())),
            blur,
            selfie_mode: self.selfie_mode,
        };
        compositor.render(&request, surface)?;

        self.shared.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.shared
            .frames_composited
            .store(compositor.frames_composited(), Ordering::Relaxed);
        {
            let mut active = lock(&self.shared.active_identifier);
            if active.as_deref() != compositor.background_identifier() {
                *active = compositor.background_identifier().map(str::to_string);
            }
        }

        Ok(surface.snapshot(frame.timestamp_us()))
    }

    fn on_stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.coordinator.close();
        if let Some(mut compositor) = self.compositor.take() {
            compositor.close();
            debug!(
                frames = self.shared.frames_processed.load(Ordering::Relaxed),
                "Virtual background stopped"
            );
        }
        self.runtime = None;
    }
}

/// Cloneable view of a [`VirtualBackground`] that outlives moving the effect
/// into a pipeline
#[derive(Clone)]
pub struct VirtualBackgroundHandle {
    shared: Arc<Shared>,
    coordinator: SegmentationCoordinator,
}

impl std::fmt::Debug for VirtualBackgroundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualBackgroundHandle")
            .field("segmentation", &self.segmentation_status())
            .field("frames_processed", &self.frames_processed())
            .finish()
    }
}

impl VirtualBackgroundHandle {
    /// Switch to a new background and stop blurring
    ///
    /// If loading fails the default color is shown and the error returned.
    pub async fn set_background(&self, source: BackgroundSource) -> FilterResult<()> {
        let result = self.shared.load_background(source).await;
        *lock(&self.shared.blur) = BlurSettings::default();
        result
    }

    /// Blur the frame's own background instead of replacing it
    pub fn set_blur_level(&self, level: BackgroundBlurLevel) {
        *lock(&self.shared.blur) = level.blur_settings();
    }

    pub fn blur_settings(&self) -> BlurSettings {
        *lock(&self.shared.blur)
    }

    /// Wait until at least `count` background loads have finished
    pub async fn wait_for_background_loads(&self, count: u64) {
        let mut loads = self.shared.loads.subscribe();
        let _ = loads.wait_for(|done| *done >= count).await;
    }

    /// Identifier of the background the next frame will be drawn against
    pub fn pending_background(&self) -> Option<String> {
        lock(&self.shared.background)
            .as_ref()
            .map(|asset| asset.identifier().to_string())
    }

    /// Identifier of the background texture held by the compositor
    pub fn active_background(&self) -> Option<String> {
        lock(&self.shared.active_identifier).clone()
    }

    pub fn segmentation_status(&self) -> SegmentationStatus {
        self.coordinator.status()
    }

    pub fn segmentation(&self) -> &SegmentationCoordinator {
        &self.coordinator
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames_processed.load(Ordering::Relaxed)
    }

    /// Frames that went through the full composite path
    pub fn frames_composited(&self) -> u64 {
        self.shared.frames_composited.load(Ordering::Relaxed)
    }
}
