//! Element model for course backup documents
//!
//! A backup is described as a tree of named elements. Tasks declare the
//! shape once, fill it from entity rows, and walk it to produce a document;
//! restore runs the same tree in reverse.
//!
//! # Core Concepts
//!
//! - [`Element`]: scalar, composite (optionally repeated) or optigroup node
//! - [`Record`]: ordered field → value row used to fill and read trees
//! - [`AlternativeSet`]: plugin sub-structures competing for one optigroup
//! - [`TransformRegistry`]: per-field value rewrites bound before processing
//! - [`ElementVisitor`]: receives open/leaf/close events in document order
//!
//! # Example
//!
//! ```rust,ignore
//! use cbr_element::{Element, ProcessContext, Record};
//!
//! let ctx = ProcessContext::detached();
//! let mut course = Element::composite("course", vec![
//!     Element::scalar("id"),
//!     Element::scalar("shortname"),
//! ])?;
//! course.fill_values(&Record::new().with("id", 2).with("shortname", "BIO101"), &ctx)?;
//! let events = course.events(&ctx)?;
//! ```

#![warn(unreachable_pub)]

mod context;
mod element;
mod error;
mod optigroup;
mod path;
mod record;
mod transform;
mod visitor;

pub use context::{Direction, ProcessContext};
pub use element::{Element, ElementKind, Value};
pub use error::{ElementError, ProcessError, StructureError};
pub use optigroup::{fixed_selector, Alternative, AlternativeSet, FnAlternative, Selector};
pub use path::ElementPath;
pub use record::Record;
pub use transform::{
    Anonymize, AnonymizeTransform, Base64Transform, TransformError, TransformInput,
    TransformOutcome, TransformRegistry, ValueTransform,
};
pub use visitor::{ElementVisitor, EventRecorder, ProcessEvent};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
