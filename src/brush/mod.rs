//! Brushes: scene-attached sources of volumetric data.
//!
//! A brush is a mesh or analytic shape baked into a local SDF grid, placed in
//! the world by a model matrix and combined into the shared volume by opcode.

pub mod shape;
pub mod bake;
pub mod brush;
pub mod registry;

pub use shape::{Axis, Shape};
pub use bake::{MeshGeometry, SdfGrid};
pub use brush::{Brush, BrushGeometry, BrushKind, BrushOp, BrushSource, DirtyState, GpuBrush, Transform};
pub use registry::{BrushLayout, BrushPatch, BrushRegistry, GeometrySlot};
