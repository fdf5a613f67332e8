//! Deterministic template-driven strategy map generator.
//!
//! Given a declarative template (zone centers, sizes, factions, per-zone
//! object budgets, connections) and a seed, the pipeline partitions the map
//! grid into zones, lays roads, generates weighted random objects until the
//! declared score targets are met, places them collision-free, and fills
//! the remaining block regions with obstacles. Identical inputs and seed
//! produce a bit-identical map.

pub mod database;
pub mod distributor;
pub mod error;
pub mod grid;
pub mod guard;
pub mod objects;
pub mod obstacle;
pub mod output;
pub mod pipeline;
pub mod pos;
pub mod region;
pub mod region_edge;
pub mod rng;
pub mod roads;
pub mod score;
pub mod segmentation;
pub mod segments;
pub mod template;
pub mod zone;

pub use error::{FailureKind, GenerationError, TemplateError};
pub use pipeline::{generate, GenerateError, Stage};
