//! Virtual resources for the render graph

use crate::backend::types::*;

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Virtual texture resource in the render graph
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub desc: TextureDescriptor,
    pub name: String,
    /// Content survives from one frame to the next (temporal history)
    pub persistent: bool,
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    Texture(VirtualTexture),
    /// External resource (like swapchain image)
    External { id: ResourceId, name: String },
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Texture(t) => t.id,
            VirtualResource::External { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::External { name, .. } => name,
        }
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read as a texture (sampled or loaded)
    TextureRead,
    /// Read of the content left by the previous frame. The reading pass must
    /// run before any pass of this frame writes the resource.
    HistoryRead,
    /// Write as a color attachment
    RenderTarget,
    /// Depth attachment
    DepthStencilWrite,
    /// Source of a texture copy
    CopySrc,
    /// Destination of a texture copy
    CopyDst,
}

/// Resource access declaration for a pass
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::TextureRead | ResourceUsage::HistoryRead | ResourceUsage::CopySrc
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::RenderTarget | ResourceUsage::DepthStencilWrite | ResourceUsage::CopyDst
        )
    }

    pub fn is_history_read(&self) -> bool {
        self.usage == ResourceUsage::HistoryRead
    }
}

/// Describes texture dimensions that can be relative to screen size
#[derive(Debug, Clone, Copy)]
pub enum TextureSize {
    /// Absolute size in pixels
    Absolute { width: u32, height: u32 },
    /// Relative to screen size (1.0 = full screen)
    Relative { width_scale: f32, height_scale: f32 },
}

impl Default for TextureSize {
    fn default() -> Self {
        TextureSize::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }
}

impl TextureSize {
    pub fn resolve(&self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        match self {
            TextureSize::Absolute { width, height } => (*width, *height),
            TextureSize::Relative {
                width_scale,
                height_scale,
            } => (
                ((screen_width as f32) * width_scale) as u32,
                ((screen_height as f32) * height_scale) as u32,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_read_is_a_read() {
        let access = ResourceAccess {
            resource: ResourceId(0),
            usage: ResourceUsage::HistoryRead,
        };
        assert!(access.is_read());
        assert!(!access.is_write());
        assert!(access.is_history_read());
    }

    #[test]
    fn test_relative_size_resolves_against_screen() {
        let size = TextureSize::Relative {
            width_scale: 0.5,
            height_scale: 1.0,
        };
        assert_eq!(size.resolve(1280, 720), (640, 720));
        assert_eq!(TextureSize::default().resolve(0, 0), (0, 0));
    }
}
