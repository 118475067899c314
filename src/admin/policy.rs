//! Composable rules deciding what an admin actor may do with a record.

use crate::user::User;

/// Record managed through the admin.
pub trait AdminRecord: Send + Sync {
    /// Application owning the record, first part of permission codenames.
    const APP_LABEL: &'static str;
    /// Lower-case model name, last part of permission codenames.
    const MODEL_NAME: &'static str;

    /// Remember who created the record.
    fn stamp_creator(&mut self, actor: &User);
}

impl AdminRecord for User {
    const APP_LABEL: &'static str = "accounts";
    const MODEL_NAME: &'static str = "user";

    fn stamp_creator(&mut self, actor: &User) {
        self.created_by = actor.id;
    }
}

/// Admin operation checked against permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Change,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Change => "change",
            Action::Delete => "delete",
        }
    }
}

/// Permission codename of `action` on `R`, e.g. `accounts.change_user`.
pub fn codename<R: AdminRecord>(action: Action) -> String {
    format!("{}.{}_{}", R::APP_LABEL, action.as_str(), R::MODEL_NAME)
}

/// Permission check used when no policy overrides it.
pub fn default_permission<R: AdminRecord>(actor: &User, action: Action) -> bool {
    actor.has_perm(&codename::<R>(action))
}

/// Policy consulted by [`crate::admin::ModelAdmin`] before writes.
///
/// Every method defaults to the plain permission check, so a policy only
/// overrides what it changes.
pub trait AdminPolicy<R: AdminRecord>: Send + Sync {
    fn can_create(&self, actor: &User) -> bool {
        default_permission::<R>(actor, Action::Add)
    }

    fn can_update(&self, actor: &User, _existing: Option<&R>) -> bool {
        default_permission::<R>(actor, Action::Change)
    }

    fn can_delete(&self, actor: &User, _existing: Option<&R>) -> bool {
        default_permission::<R>(actor, Action::Delete)
    }

    /// Called right before the record is persisted.
    fn on_save(&self, _record: &mut R, _is_new: bool, _actor: &User) {}
}

/// Plain permission checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl<R: AdminRecord> AdminPolicy<R> for DefaultPolicy {}

/// Denies any change on the records.
///
/// Listing without an instance still goes through the default check.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immutable;

impl<R: AdminRecord> AdminPolicy<R> for Immutable {
    fn can_create(&self, _actor: &User) -> bool {
        false
    }

    fn can_update(&self, actor: &User, existing: Option<&R>) -> bool {
        match existing {
            None => default_permission::<R>(actor, Action::Change),
            Some(_) => false,
        }
    }

    fn can_delete(&self, _actor: &User, _existing: Option<&R>) -> bool {
        false
    }
}

/// Saves the acting admin into `created_by` of new records.
#[derive(Debug, Default, Clone, Copy)]
pub struct StampCreator;

impl<R: AdminRecord> AdminPolicy<R> for StampCreator {
    fn on_save(&self, record: &mut R, is_new: bool, actor: &User) {
        if is_new {
            record.stamp_creator(actor);
        }
    }
}
