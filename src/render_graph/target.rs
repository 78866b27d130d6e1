//! Render target ownership
//!
//! A [`RenderTarget`] owns one texture and the view used to attach or sample
//! it. Destroying the target consumes it and releases both. [`RenderTargets`]
//! holds every target of a graph and is torn down as a unit on resize.

use std::collections::BTreeMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::resource::ResourceId;

/// A texture together with its attachment view
#[derive(Debug)]
pub struct RenderTarget {
    texture: TextureHandle,
    view: TextureViewHandle,
    desc: TextureDescriptor,
}

impl RenderTarget {
    pub fn create(backend: &mut dyn GraphicsBackend, desc: &TextureDescriptor) -> BackendResult<Self> {
        let texture = backend.create_texture(desc)?;
        let view = match backend.create_texture_view(texture) {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_texture(texture);
                return Err(e);
            }
        };

        Ok(Self {
            texture,
            view,
            desc: desc.clone(),
        })
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }

    pub fn desc(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.texture);
    }
}

/// All render targets allocated for one graph
#[derive(Debug, Default)]
pub struct RenderTargets {
    targets: BTreeMap<ResourceId, RenderTarget>,
}

impl RenderTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a target, destroying any previous target for the same resource.
    pub fn insert(&mut self, backend: &mut dyn GraphicsBackend, id: ResourceId, target: RenderTarget) {
        if let Some(old) = self.targets.insert(id, target) {
            old.destroy(backend);
        }
    }

    pub fn get(&self, id: ResourceId) -> Option<&RenderTarget> {
        self.targets.get(&id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.targets.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn destroy_all(&mut self, backend: &mut dyn GraphicsBackend) {
        let count = self.targets.len();
        while let Some((_, target)) = self.targets.pop_first() {
            target.destroy(backend);
        }
        if count > 0 {
            log::debug!("Destroyed {} render targets", count);
        }
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        if !self.targets.is_empty() {
            log::warn!(
                "{} render targets dropped without being destroyed",
                self.targets.len()
            );
        }
    }
}
