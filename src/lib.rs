//! Screen-space shadows - a render graph-based deferred renderer with contact
//! shadows and temporal antialiasing
//!
//! Every pixel of the gbuffer marches a short ray toward the light through
//! the linear depth buffer; the shadow term scales the Lambert lighting. With
//! TXAA on, the projection is jittered and the resolved color is accumulated
//! across frames through per-pixel velocity.
//!
//! # Features
//! - Render graph with declared reads/writes and history hazard validation
//! - Hard, soft and very soft contact shadows with world or screen-space radius
//! - Temporal resolve with neighbourhood clamping and Mitchell filtering
//! - wgpu backend plus a headless recording backend for tests
//! - CPU reference implementation of every shading stage in [`shading`]
//! - egui settings panel

pub mod backend;
pub mod convention;
pub mod egui_integration;
pub mod engine;
pub mod frame;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod settings;
pub mod shading;
pub mod ui;

pub use backend::wgpu_backend::WgpuBackend;
pub use backend::HeadlessBackend;
pub use convention::GraphicsBackendConvention;
pub use egui_integration::EguiOverlay;
pub use engine::{Engine, EngineConfig, EngineError, FrameOutcome};
pub use settings::{ContactShadowsMode, ShadowSettings};
