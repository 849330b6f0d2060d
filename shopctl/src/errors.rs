use crate::db::errors::DbError;
use crate::types::Operation;
use thiserror::Error as ThisError;

/// Result of every core operation handed back to the presentation layer.
///
/// Business outcomes (`InsufficientStock`, `AlreadyResolved`, ...) are ordinary values the caller
/// renders; only storage and internal failures indicate something is wrong with the process.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Not enough stock to cover the request, or a non-positive quantity
    #[error("Insufficient stock")]
    InsufficientStock,

    /// No order in `requested` state exists for the user
    #[error("No active order")]
    NoActiveOrder,

    #[error("Unknown license code")]
    UnknownCode,

    #[error("License code has already been used")]
    CodeAlreadyUsed,

    /// Generated code collided with an existing one on every attempt
    #[error("Could not generate a unique license code after {attempts} attempts")]
    CodeCollision { attempts: u32 },

    /// Top-up or order is already in a terminal state
    #[error("Already resolved")]
    AlreadyResolved,

    #[error("Amount must be positive, got {amount}")]
    InvalidAmount { amount: i64 },

    /// Caller is not on the admin list (or does not own the resource)
    #[error("Not authorized to {action}")]
    NotAuthorized { action: Operation },

    #[error("Insufficient balance: {required} required, {available} available")]
    InsufficientBalance { required: i64, available: i64 },

    /// Operation requires an active license
    #[error("No active license")]
    LicenseInactive,

    /// Invalid request data
    #[error("{message}")]
    InvalidInput { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Storage failed; the operation was rolled back
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] DbError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// Fieldless discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InsufficientStock,
    NoActiveOrder,
    UnknownCode,
    CodeAlreadyUsed,
    CodeCollision,
    AlreadyResolved,
    InvalidAmount,
    NotAuthorized,
    InsufficientBalance,
    LicenseInactive,
    InvalidInput,
    NotFound,
    StorageUnavailable,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InsufficientStock => ErrorKind::InsufficientStock,
            Error::NoActiveOrder => ErrorKind::NoActiveOrder,
            Error::UnknownCode => ErrorKind::UnknownCode,
            Error::CodeAlreadyUsed => ErrorKind::CodeAlreadyUsed,
            Error::CodeCollision { .. } => ErrorKind::CodeCollision,
            Error::AlreadyResolved => ErrorKind::AlreadyResolved,
            Error::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            Error::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::LicenseInactive => ErrorKind::LicenseInactive,
            Error::InvalidInput { .. } => ErrorKind::InvalidInput,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the caller can simply report the outcome and carry on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::StorageUnavailable(_) | Error::Internal { .. })
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::StorageUnavailable(_) | Error::Internal { .. } => "Something went wrong, please try again later".to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::StorageUnavailable(DbError::from(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_not_recoverable() {
        let err = Error::from(DbError::Other(anyhow::anyhow!("disk I/O error")));
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(!err.is_recoverable());
        assert!(!err.user_message().contains("disk"));

        let err = Error::Internal {
            operation: "build dispatcher".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_business_errors_are_recoverable() {
        let errors = [
            Error::InsufficientStock,
            Error::NoActiveOrder,
            Error::UnknownCode,
            Error::CodeAlreadyUsed,
            Error::CodeCollision { attempts: 5 },
            Error::AlreadyResolved,
            Error::InvalidAmount { amount: 0 },
            Error::NotAuthorized {
                action: Operation::ResolveTopup,
            },
            Error::InsufficientBalance {
                required: 10,
                available: 3,
            },
            Error::LicenseInactive,
        ];
        for err in errors {
            assert!(err.is_recoverable(), "{err:?} should be recoverable");
        }
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(Error::InvalidAmount { amount: -3 }.user_message(), "Amount must be positive, got -3");
        assert_eq!(
            Error::NotAuthorized {
                action: Operation::FulfillOrder
            }
            .user_message(),
            "Not authorized to fulfill order"
        );
        assert_eq!(Error::not_found("Order", 7).user_message(), "Order with ID 7 not found");
    }
}
