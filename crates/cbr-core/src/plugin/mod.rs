//! Plugin extension points
//!
//! Activities, blocks and course formats extend the core trees through
//! optigroup slots. A plugin is plain data: the engine fills, writes and
//! restores its subtree generically.

mod content;
mod format;
mod registry;

pub use content::{ContentPlugin, EntitySource, FileArea, PluginKind, Reference, SourceLink};
pub use format::FormatPlugin;
pub use registry::PluginRegistry;
