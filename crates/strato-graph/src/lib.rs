mod error;
mod graph;

pub use error::GraphError;
pub use graph::{destroy_priority, find_output_refs, DependencyGraph, GraphStats, Stage};
