//! Resource management
//!
//! Procedural meshes for the demo scene.

mod mesh;

pub use mesh::*;
