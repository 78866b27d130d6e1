//! egui GUI integration
//!
//! Draws the settings panel on top of the swapchain image after the shadow
//! graph has run, before the frame is presented.

mod wgpu;

pub use self::wgpu::EguiOverlay;
