//! Tree traversal events
//!
//! [`Element::process`](crate::Element::process) hands every element to an
//! [`ElementVisitor`] in tree order: composites open and close a group,
//! scalars with a value emit one leaf.

use std::convert::Infallible;

/// Receiver of traversal events
pub trait ElementVisitor {
    /// Error the visitor may raise to stop traversal
    type Error: std::error::Error + 'static;

    /// A composite (or optigroup) group starts
    ///
    /// # Errors
    /// Visitor-defined
    fn open(&mut self, name: &str) -> Result<(), Self::Error>;

    /// A scalar with a value; `None` is an explicit null
    ///
    /// # Errors
    /// Visitor-defined
    fn leaf(&mut self, name: &str, value: Option<&str>) -> Result<(), Self::Error>;

    /// The current group ends
    ///
    /// # Errors
    /// Visitor-defined
    fn close(&mut self, name: &str) -> Result<(), Self::Error>;
}

/// Owned traversal event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Group opened
    Open(String),
    /// Scalar value
    Leaf(String, Option<String>),
    /// Group closed
    Close(String),
}

/// Visitor collecting the event sequence
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Vec<ProcessEvent>,
}

impl EventRecorder {
    /// Empty recorder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events
    #[must_use]
    pub fn into_events(self) -> Vec<ProcessEvent> {
        self.events
    }
}

impl ElementVisitor for EventRecorder {
    type Error = Infallible;

    fn open(&mut self, name: &str) -> Result<(), Infallible> {
        self.events.push(ProcessEvent::Open(name.to_string()));
        Ok(())
    }

    fn leaf(&mut self, name: &str, value: Option<&str>) -> Result<(), Infallible> {
        self.events
            .push(ProcessEvent::Leaf(name.to_string(), value.map(str::to_string)));
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), Infallible> {
        self.events.push(ProcessEvent::Close(name.to_string()));
        Ok(())
    }
}
