pub mod config;
pub mod feed;
pub mod graph;
pub mod logging;
pub mod report;

pub use graph::{DeletePolicy, GraphStats, Tag, TagGraph};
