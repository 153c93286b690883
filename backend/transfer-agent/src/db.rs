//! Database layer — the local account store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tracing::info;

use crate::collaborators::{Account, Accounts, NewAccount};
use crate::errors::Result;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Every connection to `:memory:` opens its own empty database.
    let options = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = options.connect(&url).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    user_id: String,
    domain: String,
    username: String,
    first_name: String,
    last_name: String,
    avatar_image_url: Option<String>,
    fingerprint: String,
    added_at: i64,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            local_id: row.id.to_string(),
            user_id: row.user_id,
            domain: row.domain,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            avatar_image_url: row.avatar_image_url,
            fingerprint: row.fingerprint,
            added_at: DateTime::from_timestamp(row.added_at, 0).unwrap_or_default(),
        }
    }
}

/// [`Accounts`] backed by SQLite.
#[derive(Clone)]
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self {
            pool: init_pool(database_url).await?,
        })
    }

    async fn find(&self, user_id: &str, domain: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, user_id, domain, username, first_name, last_name,
                   avatar_image_url, fingerprint, added_at
            FROM   accounts
            WHERE  user_id = ?1 AND lower(domain) = lower(?2)
            "#,
        )
        .bind(user_id)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }
}

#[async_trait]
impl Accounts for SqliteAccountStore {
    async fn stored_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, user_id, domain, username, first_name, last_name,
                   avatar_image_url, fingerprint, added_at
            FROM   accounts
            ORDER  BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn add_account(&self, account: NewAccount) -> anyhow::Result<Account> {
        let domain = account.domain.trim_end_matches('/').to_string();
        if self.find(&account.user_id, &domain).await?.is_some() {
            anyhow::bail!(
                "account {} on {} is already stored",
                account.user_id,
                domain
            );
        }

        let added_at = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO accounts
                (user_id, domain, username, first_name, last_name,
                 avatar_image_url, fingerprint, armored_private_key, added_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&account.user_id)
        .bind(&domain)
        .bind(&account.username)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.avatar_image_url)
        .bind(&account.fingerprint)
        .bind(&account.armored_private_key)
        .bind(added_at.timestamp())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(user_id = %account.user_id, domain = %domain, "Account stored");

        Ok(Account {
            local_id: id.to_string(),
            user_id: account.user_id,
            domain,
            username: account.username,
            first_name: account.first_name,
            last_name: account.last_name,
            avatar_image_url: account.avatar_image_url,
            fingerprint: account.fingerprint,
            added_at: DateTime::from_timestamp(added_at.timestamp(), 0).unwrap_or(added_at),
        })
    }
}
