//! Identity port between the domain layer and the data mapping layer.

use async_trait::async_trait;

use crate::error::Result;
use crate::user::{EmailAddress, LocationQuery, User, UserId};

/// Port for user persistence.
///
/// Stores enforce email uniqueness and report a clash as
/// [`crate::error::AccountError::UniquenessConflict`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Store a new user and return it with its assigned id.
    async fn insert(&self, user: &User) -> Result<User>;

    /// Save every field of an already stored user.
    async fn update(&self, user: &User) -> Result<()>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>>;

    /// Every user, in store order.
    async fn find_all(&self) -> Result<Vec<User>>;

    /// Users having both coordinates, except the one with `except` id.
    async fn find_located_except(&self, except: Option<UserId>) -> Result<Vec<User>>;
}

impl<'r> dyn UserRepository + 'r {
    /// Lazy query over located users, excluding `current_user`.
    pub fn with_location<'a>(&'a self, current_user: &User) -> LocationQuery<'a> {
        LocationQuery::new(self, current_user.id)
    }
}
