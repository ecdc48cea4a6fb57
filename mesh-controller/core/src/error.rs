use crate::{Id, Type};

/// Errors returned by the resource store and the payload codec.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(Id),

    #[error("version conflict writing {id}: expected version {expected}, found {actual}")]
    Conflict { id: Id, expected: u64, actual: u64 },

    #[error("{id} is not a {expected}")]
    InvalidType { id: Id, expected: Type },

    #[error("failed to decode {id}: {source}")]
    Decode {
        id: Id,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {ty} payload: {source}")]
    Encode {
        ty: Type,
        #[source]
        source: serde_json::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Decode and type errors cannot be fixed by retrying against the same
    /// stored data.
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::InvalidType { .. })
    }
}
