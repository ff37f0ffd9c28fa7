//! Error types for element trees

/// Programmer error in an element tree definition
///
/// Always fatal; a tree that fails here cannot be processed at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    /// Two siblings share a name
    #[error("duplicate child `{name}` under `{parent}`")]
    DuplicateChild { parent: String, name: String },

    /// Empty name or a name containing `/`
    #[error("invalid element name `{0}`")]
    InvalidName(String),

    /// Children were added to an element that cannot hold them
    #[error("element `{0}` is not a composite")]
    NotComposite(String),

    /// Instance operation on a non-repeated element
    #[error("element `{0}` is not repeated")]
    NotRepeated(String),

    /// Direct fill of a repeated element; its instances are filled instead
    #[error("element `{0}` is repeated; fill its instances")]
    Repeated(String),

    /// A scalar declared as transformed has no registered transform
    #[error("no transform registered for `{parent}/{field}`")]
    MissingTransform { parent: String, field: String },

    /// Transform registered twice for the same field
    #[error("transform for `{parent}/{field}` registered twice")]
    DuplicateTransform { parent: String, field: String },

    /// Two alternatives registered under one name
    #[error("alternative `{0}` registered twice")]
    DuplicateAlternative(String),

    /// An optigroup resolves, directly or indirectly, into itself
    #[error("optigroup `{0}` resolves into itself")]
    CyclicOptigroup(String),
}

/// Failure while assigning values to an element tree
#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    /// Tree definition problem
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// Value operation on a non-scalar element
    #[error("element `{0}` is not a scalar")]
    NotScalar(String),

    /// A value transform failed
    #[error("transform for `{parent}/{field}` failed: {source}")]
    Transform {
        parent: String,
        field: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ElementError {
    /// Source error of a failed transform, if this is one
    #[must_use]
    pub fn transform_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Transform { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Failure while walking a tree with a visitor
#[derive(Debug, thiserror::Error)]
pub enum ProcessError<E: std::error::Error + 'static> {
    /// The visitor rejected an event
    #[error("visitor failed: {0}")]
    Visitor(#[source] E),

    /// The tree cannot be walked
    #[error(transparent)]
    Structure(#[from] StructureError),
}
