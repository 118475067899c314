//! PostgreSQL implementation for user repository.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::error::{AccountError, Result};
use crate::user::{
    EmailAddress, Profile, Sex, User, UserId, UserRepository,
};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "beria";
pub const DEFAULT_POOL_SIZE: u32 = 10;

const COLUMNS: &str = r#"
    id, email, password, username, last_name, first_name, middle_name,
    birth_year, birth_month, birth_day, sex, phone, address, title,
    lat, lng, want_notify_email, want_notify_news,
    is_staff, is_active, is_superuser, groups, user_permissions,
    date_joined, last_login, created_by
"#;

/// User record as stored in the database.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub username: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub birth_year: Option<i32>,
    pub birth_month: Option<i32>,
    pub birth_day: Option<i32>,
    pub sex: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub title: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub want_notify_email: bool,
    pub want_notify_news: bool,
    pub is_staff: bool,
    pub is_active: bool,
    pub is_superuser: bool,
    pub groups: Vec<String>,
    pub user_permissions: Vec<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
}

fn to_unsigned(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn to_signed(field: &'static str, value: Option<u32>) -> Result<Option<i32>> {
    value
        .map(i32::try_from)
        .transpose()
        .map_err(|_| AccountError::field(field, "range", "Value is out of range."))
}

impl UserRecord {
    /// Convert to domain [`User`].
    pub fn try_into_user(self) -> Result<User> {
        let email = EmailAddress::parse(&self.email).map_err(|err| {
            AccountError::Internal {
                details: format!("stored email of user {} is invalid", self.id),
                source: Some(Box::new(err)),
            }
        })?;

        Ok(User {
            id: Some(UserId(self.id)),
            email,
            password: self.password,
            profile: Profile {
                username: self.username,
                last_name: self.last_name,
                first_name: self.first_name,
                middle_name: self.middle_name,
                birth_year: to_unsigned(self.birth_year),
                birth_month: to_unsigned(self.birth_month),
                birth_day: to_unsigned(self.birth_day),
                sex: Sex::from_code(&self.sex),
                phone: self.phone,
                address: self.address,
                title: self.title,
                lat: self.lat,
                lng: self.lng,
                want_notify_email: self.want_notify_email,
                want_notify_news: self.want_notify_news,
            },
            is_staff: self.is_staff,
            is_active: self.is_active,
            is_superuser: self.is_superuser,
            groups: self.groups.into_iter().collect(),
            user_permissions: self.user_permissions.into_iter().collect(),
            date_joined: self.date_joined,
            last_login: self.last_login,
            created_by: self.created_by.map(UserId),
        })
    }
}

fn to_vec(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

/// PostgreSQL user repository.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new [`PgUserRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool of connections and apply pending migrations.
    pub async fn connect(
        address: &str,
        username: &str,
        password: &str,
        database: &str,
        pool_size: u32,
    ) -> Result<Self> {
        let url = format!("postgres://{username}:{password}@{address}/{database}");
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(&url)
            .await?;

        tracing::info!(%address, %database, "postgres connected");

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|err| AccountError::Sql(err.into()))?;

        Ok(Self::new(pool))
    }

    async fn fetch(&self, query: &str, bind: Option<i64>) -> Result<Vec<User>> {
        let mut q = sqlx::query_as::<_, UserRecord>(query);
        if let Some(value) = bind {
            q = q.bind(value);
        }

        q.fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(UserRecord::try_into_user)
            .collect()
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(&self, user: &User) -> Result<User> {
        let p = &user.profile;
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (
                email, password, username, last_name, first_name, middle_name,
                birth_year, birth_month, birth_day, sex, phone, address, title,
                lat, lng, want_notify_email, want_notify_news,
                is_staff, is_active, is_superuser, groups, user_permissions,
                date_joined, last_login, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user.email.as_str())
        .bind(&user.password)
        .bind(&p.username)
        .bind(&p.last_name)
        .bind(&p.first_name)
        .bind(&p.middle_name)
        .bind(to_signed("birth_year", p.birth_year)?)
        .bind(to_signed("birth_month", p.birth_month)?)
        .bind(to_signed("birth_day", p.birth_day)?)
        .bind(p.sex.code())
        .bind(&p.phone)
        .bind(&p.address)
        .bind(&p.title)
        .bind(p.lat)
        .bind(p.lng)
        .bind(p.want_notify_email)
        .bind(p.want_notify_news)
        .bind(user.is_staff)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(to_vec(&user.groups))
        .bind(to_vec(&user.user_permissions))
        .bind(user.date_joined)
        .bind(user.last_login)
        .bind(user.created_by.map(|id| id.0))
        .fetch_one(&self.pool)
        .await
        .map_err(AccountError::from_sql)?;

        record.try_into_user()
    }

    async fn update(&self, user: &User) -> Result<()> {
        let id = user.id.ok_or(AccountError::NotFound)?;
        let p = &user.profile;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET
                email = $2, password = $3, username = $4, last_name = $5,
                first_name = $6, middle_name = $7, birth_year = $8,
                birth_month = $9, birth_day = $10, sex = $11, phone = $12,
                address = $13, title = $14, lat = $15, lng = $16,
                want_notify_email = $17, want_notify_news = $18,
                is_staff = $19, is_active = $20, is_superuser = $21,
                groups = $22, user_permissions = $23, date_joined = $24,
                last_login = $25, created_by = $26
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(user.email.as_str())
        .bind(&user.password)
        .bind(&p.username)
        .bind(&p.last_name)
        .bind(&p.first_name)
        .bind(&p.middle_name)
        .bind(to_signed("birth_year", p.birth_year)?)
        .bind(to_signed("birth_month", p.birth_month)?)
        .bind(to_signed("birth_day", p.birth_day)?)
        .bind(p.sex.code())
        .bind(&p.phone)
        .bind(&p.address)
        .bind(&p.title)
        .bind(p.lat)
        .bind(p.lng)
        .bind(p.want_notify_email)
        .bind(p.want_notify_news)
        .bind(user.is_staff)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(to_vec(&user.groups))
        .bind(to_vec(&user.user_permissions))
        .bind(user.date_joined)
        .bind(user.last_login)
        .bind(user.created_by.map(|id| id.0))
        .execute(&self.pool)
        .await
        .map_err(AccountError::from_sql)?;

        if result.rows_affected() == 0 {
            return Err(AccountError::NotFound);
        }

        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        record.map(UserRecord::try_into_user).transpose()
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        record.map(UserRecord::try_into_user).transpose()
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        self.fetch(&format!("SELECT {COLUMNS} FROM users ORDER BY id"), None)
            .await
    }

    async fn find_located_except(&self, except: Option<UserId>) -> Result<Vec<User>> {
        match except {
            Some(id) => {
                self.fetch(
                    &format!(
                        r#"SELECT {COLUMNS} FROM users
                        WHERE lat IS NOT NULL AND lng IS NOT NULL AND id <> $1"#
                    ),
                    Some(id.0),
                )
                .await
            },
            None => {
                self.fetch(
                    &format!(
                        r#"SELECT {COLUMNS} FROM users
                        WHERE lat IS NOT NULL AND lng IS NOT NULL"#
                    ),
                    None,
                )
                .await
            },
        }
    }
}
