//! View library resolution
//!
//! This crate handles:
//! - View definitions as discovered in application source
//! - Content-addressed generated names
//! - Dependency resolution, cycle detection and creation order
//! - Resetting stale substitutions when a view or its upstream changes

pub mod view;
pub mod graph;

pub use view::{generated_view_name, ViewDefinition, ViewFragment, ViewSource, ViewSourceFragment};
pub use graph::{SqlCreateView, ViewError, ViewGraph};
