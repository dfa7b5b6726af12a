//! Everything a learner does while practicing, guarded by ownership checks.
//!
//! Every manager here receives the [Identity] of whoever is asking and refuses
//! to touch rows that belong to somebody else.

mod conversations;
mod dashboards;
mod personas;
mod profiles;

pub use conversations::*;
pub use dashboards::*;
pub use personas::*;
pub use profiles::*;

use log::warn;
use thiserror::Error;

use crate::{DatabaseError, Identity, PrimaryKey};

pub type PracticeResult<T> = Result<T, PracticeError>;

#[derive(Debug, Error)]
pub enum PracticeError {
    /// The resource belongs to somebody else
    #[error("You don't have access to this {0}")]
    Forbidden(&'static str),
    /// The request is missing something or has an invalid value
    #[error("{0}")]
    Validation(String),
    /// The request would break an invariant
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Fails with [PracticeError::Forbidden] unless `owner` is the identity's user
fn ensure_owner(identity: &Identity, owner: PrimaryKey, resource: &'static str) -> PracticeResult<()> {
    if identity.user_id != owner {
        warn!(
            "User {} tried to access {} owned by user {}",
            identity.user_id, resource, owner
        );

        return Err(PracticeError::Forbidden(resource));
    }

    Ok(())
}

/// Fails with [PracticeError::Validation] if the value is blank
fn required(value: &str, field: &str) -> PracticeResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(PracticeError::Validation(format!("{field} is required")));
    }

    Ok(value.to_string())
}
