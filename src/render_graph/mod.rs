//! Render Graph System
//!
//! A declarative system for defining render passes as a directed acyclic graph (DAG).
//! Passes declare what they read and write; the graph orders them, checks that
//! history textures are read before they are overwritten, and the executor
//! owns the render targets behind every virtual resource.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;
pub mod target;

pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
pub use target::*;
