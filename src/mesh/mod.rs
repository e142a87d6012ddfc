//! Surface extraction by dual contouring

pub mod contour;
pub mod extractor;

pub use contour::{contour, ContourMesh, DrawArgs, MeshCounter, MeshVertex};
pub use extractor::MeshExtractor;
