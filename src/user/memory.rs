//! In-process user store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AccountError, Result};
use crate::user::{EmailAddress, User, UserId, UserRepository};

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<UserId, User>,
}

impl Table {
    fn email_taken(&self, email: &EmailAddress, except: Option<UserId>) -> bool {
        self.rows
            .values()
            .any(|row| &row.email == email && row.id != except)
    }
}

/// User store kept in memory, ordered by id.
#[derive(Default)]
pub struct MemoryUserRepository {
    table: RwLock<Table>,
}

impl MemoryUserRepository {
    /// Create a new empty [`MemoryUserRepository`].
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn insert(&self, user: &User) -> Result<User> {
        let mut table = self.table.write().await;
        if table.email_taken(&user.email, None) {
            return Err(AccountError::UniquenessConflict);
        }

        table.next_id += 1;
        let id = UserId(table.next_id);
        let mut stored = user.clone();
        stored.id = Some(id);
        table.rows.insert(id, stored.clone());

        Ok(stored)
    }

    async fn update(&self, user: &User) -> Result<()> {
        let id = user.id.ok_or(AccountError::NotFound)?;
        let mut table = self.table.write().await;

        if !table.rows.contains_key(&id) {
            return Err(AccountError::NotFound);
        }
        if table.email_taken(&user.email, Some(id)) {
            return Err(AccountError::UniquenessConflict);
        }

        table.rows.insert(id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>> {
        Ok(self
            .table
            .read()
            .await
            .rows
            .values()
            .find(|row| &row.email == email)
            .cloned())
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        Ok(self.table.read().await.rows.values().cloned().collect())
    }

    async fn find_located_except(&self, except: Option<UserId>) -> Result<Vec<User>> {
        Ok(self
            .table
            .read()
            .await
            .rows
            .values()
            .filter(|row| row.has_location() && row.id != except)
            .cloned()
            .collect())
    }
}
