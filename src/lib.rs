//! Beria is an email-identified user account library.
//!
//! It owns the user record, the factory creating users, a location query
//! helper, and the admin layer (forms, layout and permission policies)
//! hosts plug into their back office.

#![forbid(unsafe_code)]
pub mod admin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mail;
pub mod telemetry;
pub mod user;

use std::sync::Arc;

use config::{Configuration, Storage};
use crypto::PasswordManager;
use mail::{MailManager, Mailer};
use user::{
    AvatarDescriptor, MemoryUserRepository, PgUserRepository, User, UserFactory,
    UserRepository,
};

/// State shared with the host.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub users: Arc<dyn UserRepository>,
    pub pwd: Arc<PasswordManager>,
    pub factory: UserFactory,
    pub mail: Arc<dyn Mailer>,
    pub admin: Arc<admin::AdminSite>,
}

impl AppState {
    /// Build the state described by `config`.
    pub async fn from_config(
        config: Arc<Configuration>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let users: Arc<dyn UserRepository> = match config.storage {
            Storage::Memory => Arc::new(MemoryUserRepository::new()),
            Storage::Postgres => {
                let Some(cfg) = &config.postgres else {
                    tracing::error!("missing `postgres` entry on `config.yaml` file");
                    return Err("`storage` is `postgres` but no `postgres` entry is set".into());
                };

                Arc::new(
                    PgUserRepository::connect(
                        &cfg.address,
                        cfg.username.as_deref().unwrap_or(user::DEFAULT_CREDENTIALS),
                        cfg.password.as_deref().unwrap_or(user::DEFAULT_CREDENTIALS),
                        cfg.database.as_deref().unwrap_or(user::DEFAULT_DATABASE_NAME),
                        cfg.pool_size.unwrap_or(user::DEFAULT_POOL_SIZE),
                    )
                    .await?,
                )
            },
        };

        let pwd = Arc::new(PasswordManager::new(config.argon2.clone())?);
        let factory = UserFactory::new(Arc::clone(&users), Arc::clone(&pwd));

        // handle mail sender.
        let mail = if let Some(cfg) = &config.mail {
            MailManager::new(cfg).await?
        } else {
            tracing::warn!("missing `mail` entry, user notifications will fail");
            MailManager::default()
        };

        let mut site = admin::AdminSite::new();
        admin::register(&mut site, factory.clone())?;

        Ok(Self {
            config,
            users,
            pwd,
            factory,
            mail: Arc::new(mail),
            admin: Arc::new(site),
        })
    }

    /// Avatar of `user` on the configured avatar host.
    pub fn avatar(
        &self,
        user: &User,
        secure: bool,
        size: Option<u32>,
    ) -> AvatarDescriptor {
        user.avatar_descriptor(&self.config.avatar.host, secure, size)
    }
}

/// Initialize the application state from `config.yaml`.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = Configuration::default().read()?;

    AppState::from_config(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_state() {
        let mut config = Configuration::default();
        config.argon2 = Some(crypto::fast_config());
        let state = AppState::from_config(Arc::new(config)).await.unwrap();

        assert!(state.admin.is_registered(admin::USER_MODEL));
        assert!(state.users.find_all().await.unwrap().is_empty());

        let user = state
            .factory
            .create_user(Some("john@example.com"), None, Default::default())
            .await
            .unwrap();
        assert_eq!(state.users.find_all().await.unwrap(), vec![user.clone()]);

        assert!(
            user.notify(state.mail.as_ref(), "Hi", "Hello.", None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_avatar_uses_configured_host() {
        let mut config = Configuration::default();
        config.argon2 = Some(crypto::fast_config());
        config.avatar.host = "avatars.example.com".into();
        let state = AppState::from_config(Arc::new(config)).await.unwrap();

        let user = state
            .factory
            .create_user(Some("test@example.com"), None, Default::default())
            .await
            .unwrap();
        let descriptor = state.avatar(&user, true, None);

        assert_eq!(
            descriptor.avatar,
            format!("https://avatars.example.com/avatar/{}.jpg?s=16", user.avatar_hash())
        );
    }

    #[tokio::test]
    async fn test_postgres_without_entry() {
        let mut config = Configuration::default();
        config.storage = Storage::Postgres;

        assert!(AppState::from_config(Arc::new(config)).await.is_err());
    }
}
