use shared::{
    domain::{ItemId, ItemType},
    error::{ErrorCode, ErrorReport},
};
use thiserror::Error;

pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("an item with id {id} is already registered (handle {existing})")]
    DuplicateRegistration { id: ItemId, existing: String },
    #[error("id {id} is already bound to a different item handle")]
    RegistrationConflict { id: ItemId },
    #[error("registering item is missing an identifier (type {item_type})")]
    MissingIdentifier { item_type: String },
    #[error("{0} has not been set")]
    NotInitialized(&'static str),
    #[error("no element of type {item_type} found for id {id}")]
    MissingElement { id: ItemId, item_type: ItemType },
    #[error("no element type can be resolved for id {id}")]
    UnresolvedElementType { id: ItemId },
    #[error(transparent)]
    ControllerFailure(anyhow::Error),
    #[error("reset predicate failed: {0}")]
    PredicateFailure(anyhow::Error),
}

impl HostError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::DuplicateRegistration { .. } => ErrorCode::DuplicateRegistration,
            Self::RegistrationConflict { .. } => ErrorCode::RegistrationConflict,
            Self::MissingIdentifier { .. } => ErrorCode::MissingIdentifier,
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::MissingElement { .. } | Self::UnresolvedElementType { .. } => {
                ErrorCode::MissingElement
            }
            Self::ControllerFailure(_) => ErrorCode::ControllerFailure,
            Self::PredicateFailure(_) => ErrorCode::PredicateFailure,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }
}
