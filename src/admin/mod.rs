//! Back office over users.
//!
//! [`ModelAdmin`] is what admin views call: every entry point takes the
//! acting user, asks the registered policies first, then goes through the
//! forms and the factory. [`AdminSite`] keeps one [`ModelAdmin`] per model
//! and is filled once at startup by [`register`].

pub mod forms;
pub mod layout;
pub mod policy;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{AccountError, Result};
use crate::user::{User, UserFactory, UserId};
use forms::{AdminPasswordChangeForm, UserChangeForm, UserCreationForm};
use layout::{AdminLayout, USER_LAYOUT};
use policy::{AdminPolicy, DefaultPolicy, StampCreator};

/// Registry key of the user admin.
pub const USER_MODEL: &str = "accounts.user";

/// Admin of the user model.
pub struct ModelAdmin {
    factory: UserFactory,
    policies: Vec<Arc<dyn AdminPolicy<User>>>,
    layout: AdminLayout,
}

impl ModelAdmin {
    /// Create a new [`ModelAdmin`] with the default permission checks.
    pub fn new(factory: UserFactory) -> Self {
        Self {
            factory,
            policies: Vec::new(),
            layout: USER_LAYOUT,
        }
    }

    /// Add a policy. Policies are consulted in insertion order.
    pub fn with_policy(
        mut self,
        policy: impl AdminPolicy<User> + 'static,
    ) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn layout(&self) -> &AdminLayout {
        &self.layout
    }

    fn allows(&self, check: impl Fn(&dyn AdminPolicy<User>) -> bool) -> bool {
        if self.policies.is_empty() {
            return check(&DefaultPolicy as &dyn AdminPolicy<User>);
        }

        self.policies.iter().all(|policy| check(policy.as_ref()))
    }

    fn on_save(&self, user: &mut User, is_new: bool, actor: &User) {
        for policy in &self.policies {
            policy.on_save(user, is_new, actor);
        }
    }

    /// Only active staff members reach the admin.
    fn is_admin(actor: &User) -> bool {
        actor.is_active && actor.is_staff
    }

    pub fn has_add_permission(&self, actor: &User) -> bool {
        Self::is_admin(actor) && self.allows(|p| p.can_create(actor))
    }

    pub fn has_change_permission(&self, actor: &User, user: Option<&User>) -> bool {
        Self::is_admin(actor) && self.allows(|p| p.can_update(actor, user))
    }

    pub fn has_delete_permission(&self, actor: &User, user: Option<&User>) -> bool {
        Self::is_admin(actor) && self.allows(|p| p.can_delete(actor, user))
    }

    async fn get(&self, id: UserId) -> Result<User> {
        self.factory
            .repository()
            .find_by_id(id)
            .await?
            .ok_or(AccountError::NotFound)
    }

    /// Rows of the user list, filtered by `search` and sorted.
    ///
    /// Each whitespace separated term of `search` must appear, ignoring
    /// case, in one of the search fields. Rows hold the listed columns
    /// plus `id`.
    pub async fn changelist(
        &self,
        actor: &User,
        search: Option<&str>,
    ) -> Result<Vec<Map<String, Value>>> {
        if !self.has_change_permission(actor, None) {
            return Err(AccountError::PermissionDenied { action: "view" });
        }

        let terms = search
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>();

        let mut users = self.factory.repository().find_all().await?;
        users.retain(|user| {
            terms.iter().all(|term| {
                self.layout
                    .search_fields
                    .iter()
                    .filter_map(|field| search_value(user, field))
                    .any(|value| value.to_lowercase().contains(term))
            })
        });
        users.sort_by(|a, b| a.profile.username.cmp(&b.profile.username));

        users
            .iter()
            .map(|user| self.row(user))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| AccountError::Internal {
                details: "cannot serialize user row".into(),
                source: Some(Box::new(err)),
            })
    }

    fn row(&self, user: &User) -> serde_json::Result<Map<String, Value>> {
        let Value::Object(mut fields) = serde_json::to_value(user)? else {
            return Ok(Map::new());
        };

        let mut row = Map::new();
        for name in std::iter::once(&"id").chain(self.layout.list_display) {
            if let Some(value) = fields.remove(*name) {
                row.insert((*name).to_owned(), value);
            }
        }
        Ok(row)
    }

    /// Create a user from the add screen.
    pub async fn add(&self, actor: &User, form: &UserCreationForm) -> Result<User> {
        if !self.has_add_permission(actor) {
            return Err(AccountError::PermissionDenied { action: "add" });
        }

        let mut user = form.prepare(&self.factory)?;
        self.on_save(&mut user, true, actor);
        let user = self.factory.save_new(&user).await?;

        tracing::info!(actor = ?actor.id, user_id = ?user.id, "user added from admin");
        Ok(user)
    }

    /// Save the change screen of user `id`.
    pub async fn change(
        &self,
        actor: &User,
        id: UserId,
        form: UserChangeForm,
    ) -> Result<User> {
        let mut user = self.get(id).await?;
        if !self.has_change_permission(actor, Some(&user)) {
            return Err(AccountError::PermissionDenied { action: "change" });
        }

        form.apply(&mut user)?;
        self.on_save(&mut user, false, actor);
        self.factory.repository().update(&user).await?;

        tracing::info!(actor = ?actor.id, user_id = %id, "user changed from admin");
        Ok(user)
    }

    /// Replace the password of user `id`.
    pub async fn change_password(
        &self,
        actor: &User,
        id: UserId,
        form: &AdminPasswordChangeForm,
    ) -> Result<()> {
        let mut user = self.get(id).await?;
        if !self.has_change_permission(actor, Some(&user)) {
            return Err(AccountError::PermissionDenied { action: "change" });
        }

        form.apply(&self.factory, &mut user)?;
        self.on_save(&mut user, false, actor);
        self.factory.repository().update(&user).await?;

        tracing::info!(actor = ?actor.id, user_id = %id, "password changed from admin");
        Ok(())
    }

    /// Deactivate user `id`. Records are never removed.
    pub async fn delete(&self, actor: &User, id: UserId) -> Result<User> {
        let mut user = self.get(id).await?;
        if !self.has_delete_permission(actor, Some(&user)) {
            return Err(AccountError::PermissionDenied { action: "delete" });
        }

        user.is_active = false;
        self.on_save(&mut user, false, actor);
        self.factory.repository().update(&user).await?;

        tracing::info!(actor = ?actor.id, user_id = %id, "user deactivated from admin");
        Ok(user)
    }
}

fn search_value<'a>(user: &'a User, field: &str) -> Option<&'a str> {
    match field {
        "email" => Some(user.email.as_str()),
        "username" => user.profile.username.as_deref(),
        "first_name" => user.profile.first_name.as_deref(),
        "last_name" => user.profile.last_name.as_deref(),
        "middle_name" => user.profile.middle_name.as_deref(),
        "phone" => user.profile.phone.as_deref(),
        _ => None,
    }
}

/// Registry of model admins.
#[derive(Default)]
pub struct AdminSite {
    models: BTreeMap<&'static str, Arc<ModelAdmin>>,
}

impl AdminSite {
    /// Create a new empty [`AdminSite`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `admin` under `model`.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Internal`] if `model` is already registered.
    pub fn register(&mut self, model: &'static str, admin: ModelAdmin) -> Result<()> {
        if self.models.contains_key(model) {
            return Err(AccountError::Internal {
                details: format!("{model} is already registered"),
                source: None,
            });
        }

        self.models.insert(model, Arc::new(admin));
        tracing::debug!(%model, "admin registered");
        Ok(())
    }

    pub fn get(&self, model: &str) -> Option<Arc<ModelAdmin>> {
        self.models.get(model).cloned()
    }

    pub fn is_registered(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Registered model keys, sorted.
    pub fn models(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.models.keys().copied()
    }
}

/// Register the user admin on `site`.
pub fn register(site: &mut AdminSite, factory: UserFactory) -> Result<()> {
    site.register(USER_MODEL, ModelAdmin::new(factory).with_policy(StampCreator))
}
