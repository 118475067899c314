//! Selections over users that share their position.

use crate::error::Result;
use crate::user::{User, UserId, UserRepository};

/// Lazy query over users having both `lat` and `lng`.
///
/// Nothing touches the store until [`LocationQuery::fetch_all`] is awaited,
/// and every call evaluates against the current state.
#[derive(Clone, Copy)]
pub struct LocationQuery<'a> {
    repo: &'a dyn UserRepository,
    except: Option<UserId>,
}

impl<'a> LocationQuery<'a> {
    /// Create a new [`LocationQuery`] excluding the user with `except` id.
    pub fn new(repo: &'a dyn UserRepository, except: Option<UserId>) -> Self {
        Self { repo, except }
    }

    /// Id left out of the results.
    pub fn excluded(&self) -> Option<UserId> {
        self.except
    }

    /// Evaluate the query.
    pub async fn fetch_all(&self) -> Result<Vec<User>> {
        let users = self.repo.find_located_except(self.except).await?;
        tracing::debug!(
            excluded = ?self.except,
            count = users.len(),
            "located users fetched"
        );
        Ok(users)
    }
}

impl std::fmt::Debug for LocationQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationQuery")
            .field("except", &self.except)
            .finish()
    }
}
