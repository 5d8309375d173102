use crate::filter::FilterSelections;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SelectError {
    #[error("malformed {document}: {cause}")]
    MalformedInput { document: String, cause: String },
    #[error("unable to read {document}: {cause}")]
    UnreadableInput { document: String, cause: String },
    #[error("no entity matches the requested filters; filters were cleared")]
    NoMatch { selections: FilterSelections },
    #[error("cannot sample from an empty subset")]
    EmptySubset,
    #[error("unknown attribute axis `{0}`")]
    UnknownAttributeAxis(String),
    #[error("distribution has {distribution} entries for a subset of {subset}")]
    DistributionMismatch { subset: usize, distribution: usize },
}

impl SelectError {
    pub(crate) fn malformed(document: &str, cause: impl Into<String>) -> Self {
        Self::MalformedInput { document: document.to_string(), cause: cause.into() }
    }

    /// Stable machine-readable code, used by front ends for error display.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput { .. } => "malformed_input",
            Self::UnreadableInput { .. } => "unreadable_input",
            Self::NoMatch { .. } => "no_match",
            Self::EmptySubset => "empty_subset",
            Self::UnknownAttributeAxis(_) => "unknown_attribute_axis",
            Self::DistributionMismatch { .. } => "distribution_mismatch",
        }
    }

    /// Whether this error came from loading a document.
    #[must_use]
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::MalformedInput { .. } | Self::UnreadableInput { .. })
    }
}
