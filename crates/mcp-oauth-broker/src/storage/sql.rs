//! SQLite storage backend.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC so that string
//! comparison in `WHERE expires_at < $1` orders them correctly. JSON-valued fields
//! (redirect URIs, grant types, user claims) are stored as TEXT.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use super::{AuthorizationCode, Client, RefreshToken, Storage};
use crate::error::{StorageError, StorageResult};
use crate::pkce::PkceMethod;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS oauth_clients (
        id TEXT NOT NULL,
        client_id TEXT PRIMARY KEY,
        client_secret TEXT NOT NULL,
        name TEXT NOT NULL,
        redirect_uris TEXT NOT NULL,
        grant_types TEXT NOT NULL,
        require_pkce INTEGER NOT NULL,
        active INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth_authorization_codes (
        id TEXT NOT NULL,
        code TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        user_claims JSON NOT NULL,
        code_challenge TEXT,
        code_challenge_method TEXT,
        redirect_uri TEXT NOT NULL,
        scope TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        used INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth_refresh_tokens (
        id TEXT NOT NULL,
        token TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        user_claims JSON NOT NULL,
        scope TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_oauth_codes_expires ON oauth_authorization_codes(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_oauth_refresh_client ON oauth_refresh_tokens(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_oauth_refresh_expires ON oauth_refresh_tokens(expires_at)",
];

/// Storage backed by a SQLite connection pool.
#[derive(Clone)]
pub struct SqlStorage {
    pool: SqlitePool,
}

impl SqlStorage {
    /// Connect to a database URL (e.g. `sqlite://broker.db`), creating the file
    /// and schema if needed.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let storage = Self::from_pool(pool).await?;
        info!(url, "SQL storage ready");
        Ok(storage)
    }

    /// Private in-memory database. A single connection keeps every query on the
    /// same database.
    pub async fn in_memory() -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and apply the schema.
    pub async fn from_pool(pool: SqlitePool) -> StorageResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp {value:?}: {e}")))
}

fn row_to_client(row: &SqliteRow) -> StorageResult<Client> {
    let redirect_uris: String = row.try_get("redirect_uris")?;
    let grant_types: String = row.try_get("grant_types")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Client {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        client_secret: row.try_get("client_secret")?,
        name: row.try_get("name")?,
        redirect_uris: serde_json::from_str(&redirect_uris)?,
        grant_types: serde_json::from_str(&grant_types)?,
        require_pkce: row.try_get("require_pkce")?,
        active: row.try_get("active")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_code(row: &SqliteRow) -> StorageResult<AuthorizationCode> {
    let user_claims: String = row.try_get("user_claims")?;
    let method: Option<String> = row.try_get("code_challenge_method")?;
    let expires_at: String = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;

    let code_challenge_method = method
        .map(|m| m.parse::<PkceMethod>())
        .transpose()
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;

    Ok(AuthorizationCode {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        client_id: row.try_get("client_id")?,
        user_id: row.try_get("user_id")?,
        user_claims: serde_json::from_str(&user_claims)?,
        code_challenge: row.try_get("code_challenge")?,
        code_challenge_method,
        redirect_uri: row.try_get("redirect_uri")?,
        scope: row.try_get("scope")?,
        expires_at: parse_timestamp(&expires_at)?,
        used: row.try_get("used")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_refresh_token(row: &SqliteRow) -> StorageResult<RefreshToken> {
    let user_claims: String = row.try_get("user_claims")?;
    let expires_at: String = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(RefreshToken {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        client_id: row.try_get("client_id")?,
        user_id: row.try_get("user_id")?,
        user_claims: serde_json::from_str(&user_claims)?,
        scope: row.try_get("scope")?,
        expires_at: parse_timestamp(&expires_at)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl Storage for SqlStorage {
    async fn create_client(&self, client: &Client) -> StorageResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO oauth_clients
                (id, client_id, client_secret, name, redirect_uris, grant_types,
                 require_pkce, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(&client.id)
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.name)
        .bind(serde_json::to_string(&client.redirect_uris)?)
        .bind(serde_json::to_string(&client.grant_types)?)
        .bind(client.require_pkce)
        .bind(client.active)
        .bind(timestamp(&client.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::ClientExists(client.client_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_client(&self, client_id: &str) -> StorageResult<Client> {
        let row = sqlx::query("SELECT * FROM oauth_clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::not_found("client"))?;
        row_to_client(&row)
    }

    async fn update_client(&self, client: &Client) -> StorageResult<()> {
        let result = sqlx::query(
            r"
            UPDATE oauth_clients SET
                client_secret = $1, name = $2, redirect_uris = $3, grant_types = $4,
                require_pkce = $5, active = $6
            WHERE client_id = $7
            ",
        )
        .bind(&client.client_secret)
        .bind(&client.name)
        .bind(serde_json::to_string(&client.redirect_uris)?)
        .bind(serde_json::to_string(&client.grant_types)?)
        .bind(client.require_pkce)
        .bind(client.active)
        .bind(&client.client_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("client"));
        }
        Ok(())
    }

    async fn delete_client(&self, client_id: &str) -> StorageResult<()> {
        sqlx::query("UPDATE oauth_clients SET active = 0 WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        let rows =
            sqlx::query("SELECT * FROM oauth_clients WHERE active = 1 ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_client).collect()
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO oauth_authorization_codes
                (id, code, client_id, user_id, user_claims, code_challenge,
                 code_challenge_method, redirect_uri, scope, expires_at, used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(&code.id)
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(&code.user_id)
        .bind(serde_json::to_string(&code.user_claims)?)
        .bind(code.code_challenge.as_deref())
        .bind(code.code_challenge_method.map(PkceMethod::as_str))
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(timestamp(&code.expires_at))
        .bind(code.used)
        .bind(timestamp(&code.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_authorization_code(&self, code: &str) -> StorageResult<AuthorizationCode> {
        let row = sqlx::query("SELECT * FROM oauth_authorization_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::not_found("authorization code"))?;
        row_to_code(&row)
    }

    async fn mark_authorization_code_used(&self, code: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE oauth_authorization_codes SET used = 1 WHERE code = $1 AND used = 0",
        )
        .bind(code)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM oauth_authorization_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists { Ok(false) } else { Err(StorageError::not_found("authorization code")) }
    }

    async fn delete_authorization_code(&self, code: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM oauth_authorization_codes WHERE code = $1")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cleanup_expired_codes(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_authorization_codes WHERE expires_at < $1")
            .bind(timestamp(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_refresh_token(&self, token: &RefreshToken) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO oauth_refresh_tokens
                (id, token, client_id, user_id, user_claims, scope, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&token.id)
        .bind(&token.token)
        .bind(&token.client_id)
        .bind(&token.user_id)
        .bind(serde_json::to_string(&token.user_claims)?)
        .bind(&token.scope)
        .bind(timestamp(&token.expires_at))
        .bind(timestamp(&token.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> StorageResult<RefreshToken> {
        let row = sqlx::query("SELECT * FROM oauth_refresh_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::not_found("refresh token"))?;
        row_to_refresh_token(&row)
    }

    async fn delete_refresh_token(&self, token: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_refresh_tokens_for_client(&self, client_id: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_expired_tokens(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE expires_at < $1")
            .bind(timestamp(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
