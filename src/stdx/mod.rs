//! Small, self-contained data structures used across the project.

pub mod ordered_map;

pub use ordered_map::OrderedMap;
