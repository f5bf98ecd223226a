use switchboard_core::errors::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid input schema for {name}: {reason}")]
    InvalidSchema { name: String, reason: String },
}

impl RegistryError {
    /// Client-facing kind, where one exists.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::DuplicateTool(_) => Some(ErrorKind::DuplicateTool),
            Self::NotFound(_) => Some(ErrorKind::UnknownTool),
            Self::InvalidSchema { .. } => None,
        }
    }
}
