//! Main engine orchestrator
//!
//! Owns the backend, the scene, the per-frame state and the shadow graph.
//! The graph and its render targets are rebuilt as a whole whenever the
//! viewport size or the TXAA toggle changes; there is no partial update.

use std::time::Duration;

use glam::Vec2;
use thiserror::Error;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::convention::GraphicsBackendConvention;
use crate::frame::{FrameInputs, FrameState, FrameUniforms, FrameUniformsGpu, JitterSequence, DEFAULT_JITTER_CENTER};
use crate::pipeline::{build_shadow_graph, temporal_color_format, ShadowGraphConfig, ShadowGraphResources};
use crate::render_graph::{CompiledGraph, FrameBindings, GraphError, RenderGraph, RenderGraphExecutor};
use crate::scene::{Scene, SceneBuffers, DEFAULT_MODEL_COUNT};
use crate::settings::ShadowSettings;

/// Engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Configuration for initializing the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Clip-space convention of the backend
    pub convention: GraphicsBackendConvention,
    /// Number of scattered models
    pub model_count: usize,
    /// Seed for model placement
    pub seed: u64,
    /// Sleep after each submission while `debug_slow_frame` is on
    pub slow_frame_delay: Duration,
    /// Center of the jitter pattern in pixels
    pub jitter_center: Vec2,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Screen-Space Shadows".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            convention: GraphicsBackendConvention::WGPU,
            model_count: DEFAULT_MODEL_COUNT,
            seed: 0x5eed,
            slow_frame_delay: Duration::from_millis(100),
            jitter_center: DEFAULT_JITTER_CENTER,
        }
    }
}

/// What happened to a requested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// Nothing was submitted: zero-sized viewport or a lost surface
    Skipped,
}

/// A compiled shadow graph with its allocated targets
struct GraphState {
    graph: RenderGraph,
    compiled: CompiledGraph,
    resources: ShadowGraphResources,
    executor: RenderGraphExecutor,
    width: u32,
    height: u32,
    txaa: bool,
}

impl GraphState {
    fn matches(&self, width: u32, height: u32, txaa: bool) -> bool {
        self.width == width && self.height == height && self.txaa == txaa
    }

    fn destroy(mut self, backend: &mut dyn GraphicsBackend) {
        self.executor.cleanup(&mut self.graph, backend);
    }
}

/// The main graphics engine
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    config: EngineConfig,
    scene: Scene,
    settings: ShadowSettings,
    frame_state: FrameState,
    bindings: FrameBindings,
    scene_buffers: Option<SceneBuffers>,
    graph: Option<GraphState>,
    last_uniforms: Option<FrameUniforms>,
    width: u32,
    height: u32,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Create an engine on an initialized backend
    pub fn new(mut backend: B, config: EngineConfig) -> EngineResult<Self> {
        let uniforms = backend.create_buffer(&BufferDescriptor {
            label: Some("frame uniforms".into()),
            size: std::mem::size_of::<FrameUniformsGpu>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let bindings = FrameBindings {
            uniforms,
            point_sampler: backend.create_sampler(&SamplerDescriptor::point_clamp("point sampler"))?,
            linear_sampler: backend.create_sampler(&SamplerDescriptor {
                label: Some("linear sampler".into()),
                ..SamplerDescriptor::default()
            })?,
            surface_format: backend.swapchain_format(),
        };

        let scene = Scene::generate(config.model_count, config.seed);
        let scene_buffers = SceneBuffers::new(&mut backend, &scene)?;
        let frame_state = FrameState::new(
            config.convention,
            JitterSequence {
                center: config.jitter_center,
            },
        );
        let (width, height) = backend.surface_size();

        log::info!(
            "Engine initialized: {}x{}, {} models, {:?}",
            width,
            height,
            scene.models.len(),
            config.convention
        );

        Ok(Self {
            backend,
            config,
            scene,
            settings: ShadowSettings::default(),
            frame_state,
            bindings,
            scene_buffers: Some(scene_buffers),
            graph: None,
            last_uniforms: None,
            width,
            height,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ShadowSettings {
        &mut self.settings
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn frame_state(&self) -> &FrameState {
        &self.frame_state
    }

    /// Uniforms of the last submitted frame
    pub fn last_uniforms(&self) -> Option<&FrameUniforms> {
        self.last_uniforms.as_ref()
    }

    /// Resources of the current graph, if one is built
    pub fn graph_resources(&self) -> Option<&ShadowGraphResources> {
        self.graph.as_ref().map(|g| &g.resources)
    }

    /// Current dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Handle a viewport resize.
    ///
    /// Destroys every render target immediately; they are recreated at the
    /// next rendered frame. A zero-sized viewport keeps the engine idle.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.backend.resize(width, height);
            let (width, height) = self.backend.surface_size();
            self.width = width;
            self.height = height;
        } else {
            self.width = width;
            self.height = height;
        }

        if let Some(state) = self.graph.take() {
            log::debug!("Viewport now {}x{}, releasing render targets", self.width, self.height);
            state.destroy(&mut self.backend);
        }
    }

    /// Advance the scene by `dt` seconds and render one frame
    pub fn render_frame(&mut self, dt: f32) -> EngineResult<FrameOutcome> {
        self.render_frame_with_overlay(dt, |_, _| Ok(()))
    }

    /// Render one frame and let `overlay` draw on the swapchain before it
    /// is presented (used for the settings UI).
    pub fn render_frame_with_overlay<F>(&mut self, dt: f32, overlay: F) -> EngineResult<FrameOutcome>
    where
        F: FnOnce(&mut B, &FrameContext) -> BackendResult<()>,
    {
        if self.width == 0 || self.height == 0 {
            log::trace!("Skipping frame for zero-sized viewport");
            return Ok(FrameOutcome::Skipped);
        }

        self.settings = self.settings.sanitized();
        self.scene.update(dt, self.settings.move_light);
        self.ensure_graph()?;

        let frame = match self.backend.begin_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_recoverable() => {
                log::warn!("{}, reconfiguring surface and skipping frame", e);
                self.backend.resize(self.width, self.height);
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let uniforms = self.frame_state.begin_frame(FrameInputs {
            camera: &self.scene.camera,
            light: self.scene.light.light(),
            settings: &self.settings,
            width: self.width,
            height: self.height,
        });
        self.backend
            .write_buffer(self.bindings.uniforms, 0, bytemuck::bytes_of(&uniforms.to_gpu()));

        let draws = match &self.scene_buffers {
            Some(buffers) => buffers.update(&mut self.backend, &self.scene),
            None => Vec::new(),
        };

        let Some(state) = self.graph.as_mut() else {
            return Ok(FrameOutcome::Skipped);
        };
        state
            .executor
            .set_external_view(state.resources.swapchain, frame.swapchain_view);
        state
            .executor
            .execute(&state.graph, &state.compiled, &mut self.backend, &draws)?;

        overlay(&mut self.backend, &frame)?;

        match self.backend.end_frame() {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                log::warn!("{} on present, skipping frame", e);
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        }

        self.frame_state.end_frame();
        self.last_uniforms = Some(uniforms);

        if self.settings.debug_slow_frame {
            std::thread::sleep(self.config.slow_frame_delay);
        }

        Ok(FrameOutcome::Rendered)
    }

    /// Rebuild the graph if the viewport or the TXAA toggle changed
    fn ensure_graph(&mut self) -> EngineResult<()> {
        let txaa = self.settings.enable_txaa;
        if let Some(state) = &self.graph {
            if state.matches(self.width, self.height, txaa) {
                return Ok(());
            }
        }
        if let Some(state) = self.graph.take() {
            state.destroy(&mut self.backend);
        }

        let (mut graph, resources) = build_shadow_graph(&ShadowGraphConfig {
            width: self.width,
            height: self.height,
            enable_txaa: txaa,
            color_format: temporal_color_format(&self.backend),
        })?;
        let compiled = graph.compile()?;

        let mut executor = RenderGraphExecutor::new();
        let built = executor
            .allocate_resources(&graph, &mut self.backend)
            .and_then(|()| executor.prepare(&mut graph, &mut self.backend, self.bindings));
        if let Err(e) = built {
            executor.cleanup(&mut graph, &mut self.backend);
            return Err(e.into());
        }

        log::debug!(
            "Rebuilt shadow graph {}x{} (TXAA {}): {} passes",
            self.width,
            self.height,
            if txaa { "on" } else { "off" },
            compiled.pass_order.len()
        );

        self.frame_state.reset_history();
        self.graph = Some(GraphState {
            graph,
            compiled,
            resources,
            executor,
            width: self.width,
            height: self.height,
            txaa,
        });
        Ok(())
    }

    /// Release every GPU object owned by the engine and return the backend
    pub fn shutdown(mut self) -> B {
        if let Some(state) = self.graph.take() {
            state.destroy(&mut self.backend);
        }
        if let Some(buffers) = self.scene_buffers.take() {
            buffers.destroy(&mut self.backend);
        }
        self.backend.destroy_buffer(self.bindings.uniforms);
        log::info!("Engine shut down");
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, RecordedCommand};
    use rstest::rstest;

    fn engine(width: u32, height: u32) -> Engine<HeadlessBackend> {
        let config = EngineConfig {
            width,
            height,
            model_count: 12,
            ..EngineConfig::default()
        };
        Engine::new(HeadlessBackend::new(width, height), config).unwrap()
    }

    #[test]
    fn test_zero_size_skips_without_submission_and_recovers() {
        let mut engine = engine(64, 32);
        assert_eq!(engine.render_frame(0.016).unwrap(), FrameOutcome::Rendered);
        assert_eq!(engine.backend().submitted_frames(), 1);

        engine.resize(0, 0);
        assert_eq!(engine.backend().live_textures(), 0);
        engine.backend_mut().clear_commands();
        assert_eq!(engine.render_frame(0.016).unwrap(), FrameOutcome::Skipped);
        assert_eq!(engine.backend().submitted_frames(), 1);
        assert!(engine.backend().commands().is_empty());

        engine.resize(64, 32);
        assert_eq!(engine.render_frame(0.016).unwrap(), FrameOutcome::Rendered);
        assert_eq!(engine.backend().submitted_frames(), 2);
        assert!(!engine.last_uniforms().unwrap().have_previous);
    }

    #[test]
    fn test_history_flag_after_first_frame_and_resize() {
        let mut engine = engine(64, 32);
        engine.settings_mut().enable_txaa = true;

        engine.render_frame(0.016).unwrap();
        assert!(!engine.last_uniforms().unwrap().have_previous);
        engine.render_frame(0.016).unwrap();
        assert!(engine.last_uniforms().unwrap().have_previous);

        engine.resize(48, 48);
        engine.render_frame(0.016).unwrap();
        assert!(!engine.last_uniforms().unwrap().have_previous);
        engine.render_frame(0.016).unwrap();
        assert!(engine.last_uniforms().unwrap().have_previous);
    }

    #[test]
    fn test_toggling_txaa_rebuilds_graph_and_resets_history() {
        let mut engine = engine(64, 32);
        engine.render_frame(0.016).unwrap();
        engine.render_frame(0.016).unwrap();
        assert!(engine.graph_resources().unwrap().history.is_none());

        engine.settings_mut().enable_txaa = true;
        engine.render_frame(0.016).unwrap();
        assert!(engine.graph_resources().unwrap().history.is_some());
        assert!(!engine.last_uniforms().unwrap().have_previous);
    }

    #[rstest]
    #[case::direct(false, &["G-Buffer Pass", "Linear Depth Pass", "Shadow Pass", "Combine Pass"])]
    #[case::txaa(true, &["G-Buffer Pass", "Linear Depth Pass", "Shadow Pass", "Combine Pass", "TXAA Pass", "Present Pass"])]
    fn test_frame_submits_passes_in_order(#[case] txaa: bool, #[case] expected: &[&str]) {
        let mut engine = engine(64, 32);
        engine.settings_mut().enable_txaa = txaa;
        engine.backend_mut().clear_commands();
        engine.render_frame(0.016).unwrap();
        assert_eq!(engine.backend().pass_labels(), expected);

        let commands = engine.backend().commands();
        let copies = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::CopyTexture { .. }))
            .count();
        assert_eq!(copies, usize::from(txaa));
    }

    #[test]
    fn test_uniforms_written_before_first_pass() {
        let mut engine = engine(64, 32);
        engine.backend_mut().clear_commands();
        engine.render_frame(0.016).unwrap();

        let uniforms = engine.bindings.uniforms;
        let commands = engine.backend().commands();
        let write = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::WriteBuffer { buffer, len } if *buffer == uniforms && *len == 448))
            .unwrap();
        let first_pass = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
            .unwrap();
        assert!(write < first_pass);
    }

    #[test]
    fn test_txaa_falls_back_when_packed_float_is_not_renderable() {
        let config = EngineConfig {
            width: 64,
            height: 32,
            model_count: 12,
            ..EngineConfig::default()
        };
        let backend = HeadlessBackend::new(64, 32).without_render_format(TextureFormat::Rg11b10Float);
        let mut engine = Engine::new(backend, config).unwrap();
        engine.settings_mut().enable_txaa = true;

        assert_eq!(engine.render_frame(0.016).unwrap(), FrameOutcome::Rendered);
        assert_eq!(engine.render_frame(0.016).unwrap(), FrameOutcome::Rendered);
        for label in ["current_color", "txaa_output", "txaa_history"] {
            let textures = engine.backend().textures_labeled(label);
            assert_eq!(textures.len(), 1, "{label}");
            assert_eq!(textures[0].format, TextureFormat::Rgba16Float, "{label}");
        }
    }

    #[test]
    fn test_lost_surface_skips_frame() {
        let mut engine = engine(64, 32);
        engine.render_frame(0.016).unwrap();

        engine.backend_mut().fail_next_frame(BackendError::SurfaceLost);
        assert_eq!(engine.render_frame(0.016).unwrap(), FrameOutcome::Skipped);
        assert_eq!(engine.backend().submitted_frames(), 1);

        assert_eq!(engine.render_frame(0.016).unwrap(), FrameOutcome::Rendered);
        assert_eq!(engine.backend().submitted_frames(), 2);
    }

    #[test]
    fn test_fatal_backend_error_propagates() {
        let mut engine = engine(64, 32);
        engine.backend_mut().fail_next_frame(BackendError::OutOfMemory);
        assert!(matches!(
            engine.render_frame(0.016),
            Err(EngineError::Backend(BackendError::OutOfMemory))
        ));
    }

    #[test]
    fn test_resizes_do_not_leak_targets() {
        let mut engine = engine(64, 32);
        engine.settings_mut().enable_txaa = true;
        engine.render_frame(0.016).unwrap();
        let textures = engine.backend().live_textures();
        let views = engine.backend().live_texture_views();
        let bind_groups = engine.backend().live_bind_groups();

        for (w, h) in [(128, 64), (0, 0), (16, 16), (64, 32)] {
            engine.resize(w, h);
            engine.render_frame(0.016).unwrap();
        }

        assert_eq!(engine.backend().live_textures(), textures);
        assert_eq!(engine.backend().live_texture_views(), views);
        assert_eq!(engine.backend().live_bind_groups(), bind_groups);
        let history = engine.backend().textures_labeled("txaa_history");
        assert_eq!(history.len(), 1);
        assert_eq!((history[0].width, history[0].height), (64, 32));
    }

    #[test]
    fn test_shutdown_releases_targets() {
        let mut engine = engine(64, 32);
        engine.settings_mut().enable_txaa = true;
        engine.render_frame(0.016).unwrap();
        let backend = engine.shutdown();
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.live_bind_groups(), 0);
        assert_eq!(backend.live_pipelines(), 0);
    }

    #[test]
    fn test_slow_frame_sleeps_after_submission() {
        let mut engine = Engine::new(
            HeadlessBackend::new(16, 16),
            EngineConfig {
                model_count: 4,
                slow_frame_delay: Duration::from_millis(20),
                ..EngineConfig::default()
            },
        )
        .unwrap();
        engine.settings_mut().debug_slow_frame = true;
        let start = std::time::Instant::now();
        engine.render_frame(0.016).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
