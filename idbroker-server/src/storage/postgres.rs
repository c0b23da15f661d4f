//! Postgres-backed `Storage`. Per-key linearizability comes from
//! `SELECT ... FOR UPDATE` inside a transaction around every `Update`,
//! not from an in-process lock — correct across replicas, which is the
//! whole point of putting signing-key rotation behind this trait.
//!
//! Queries are built with `sqlx::query_as` (runtime-checked) rather
//! than the `query!`/`query_as!` macros: those need either a live
//! database or a committed `.sqlx` offline cache at build time, neither
//! of which this crate can produce here. See DESIGN.md.
//!
//! Columns for fields with no direct SQL representation (arrays of
//! structs, nested claims, JWKs) are stored as `jsonb` and shimmed
//! through small `*Row` structs that `sqlx::FromRow` can derive
//! directly, then converted into the domain type by hand.

use async_trait::async_trait;
use idbroker_types::{
    AuthClaims, AuthCode, AuthRequest, Client, Connector, Keys, OfflineSession, Password,
    PkceChallenge, PrivateJwk, PublicJwk, RefreshToken, RefreshTokenRef, VerificationKey,
};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::collections::HashMap;
use time::OffsetDateTime;

use super::{GcCounts, Mutator, Storage, StorageError, StorageResult};

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn not_found_or_backend(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        other => backend(other),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e.as_database_error(), Some(db) if db.is_unique_violation())
}

#[derive(sqlx::FromRow)]
struct AuthRequestRow {
    id: String,
    client_id: String,
    response_types: serde_json::Value,
    scopes: serde_json::Value,
    redirect_uri: String,
    nonce: Option<String>,
    state: Option<String>,
    force_approval_prompt: bool,
    expiry: OffsetDateTime,
    logged_in: bool,
    claims: Option<serde_json::Value>,
    connector_id: Option<String>,
    connector_data: Vec<u8>,
    pkce: Option<serde_json::Value>,
    hmac_key: String,
}

impl TryFrom<AuthRequestRow> for AuthRequest {
    type Error = StorageError;
    fn try_from(row: AuthRequestRow) -> StorageResult<Self> {
        Ok(AuthRequest {
            id: row.id,
            client_id: row.client_id,
            response_types: serde_json::from_value(row.response_types).map_err(json_err)?,
            scopes: serde_json::from_value(row.scopes).map_err(json_err)?,
            redirect_uri: row.redirect_uri,
            nonce: row.nonce,
            state: row.state,
            force_approval_prompt: row.force_approval_prompt,
            expiry: row.expiry,
            logged_in: row.logged_in,
            claims: row
                .claims
                .map(|v| serde_json::from_value::<AuthClaims>(v))
                .transpose()
                .map_err(json_err)?,
            connector_id: row.connector_id,
            connector_data: row.connector_data,
            pkce: row
                .pkce
                .map(|v| serde_json::from_value::<PkceChallenge>(v))
                .transpose()
                .map_err(json_err)?,
            hmac_key: row.hmac_key,
        })
    }
}

fn json_err(e: serde_json::Error) -> StorageError {
    StorageError::Backend(format!("corrupt json column: {e}"))
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn create_client(&self, client: Client) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO clients (id, secret, redirect_uris, trusted_peers, public, name, logo_url, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&client.id)
        .bind(&client.secret)
        .bind(serde_json::to_value(&client.redirect_uris).map_err(json_err)?)
        .bind(serde_json::to_value(&client.trusted_peers).map_err(json_err)?)
        .bind(client.public)
        .bind(&client.name)
        .bind(&client.logo_url)
        .bind(client.created_at)
        .bind(client.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { StorageError::AlreadyExists } else { backend(e) })?;
        Ok(())
    }

    async fn get_client(&self, id: &str) -> StorageResult<Client> {
        let row = sqlx::query(
            "SELECT id, secret, redirect_uris, trusted_peers, public, name, logo_url, created_at, updated_at
             FROM clients WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_backend)?;
        row_to_client(row)
    }

    async fn update_client(&self, id: &str, mutator: Mutator<Client>) -> StorageResult<Client> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row = sqlx::query(
            "SELECT id, secret, redirect_uris, trusted_peers, public, name, logo_url, created_at, updated_at
             FROM clients WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(not_found_or_backend)?;
        let current = row_to_client(row)?;
        let updated = mutator(current)?;
        sqlx::query(
            "UPDATE clients SET secret = $2, redirect_uris = $3, trusted_peers = $4, public = $5,
             name = $6, logo_url = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(&updated.id)
        .bind(&updated.secret)
        .bind(serde_json::to_value(&updated.redirect_uris).map_err(json_err)?)
        .bind(serde_json::to_value(&updated.trusted_peers).map_err(json_err)?)
        .bind(updated.public)
        .bind(&updated.name)
        .bind(&updated.logo_url)
        .bind(updated.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn delete_client(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        let rows = sqlx::query(
            "SELECT id, secret, redirect_uris, trusted_peers, public, name, logo_url, created_at, updated_at FROM clients",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(row_to_client).collect()
    }

    async fn create_connector(&self, connector: Connector) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO connectors (id, connector_type, name, resource_version, config, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&connector.id)
        .bind(&connector.connector_type)
        .bind(&connector.name)
        .bind(&connector.resource_version)
        .bind(&connector.config)
        .bind(connector.created_at)
        .bind(connector.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { StorageError::AlreadyExists } else { backend(e) })?;
        Ok(())
    }

    async fn get_connector(&self, id: &str) -> StorageResult<Connector> {
        let row = sqlx::query(
            "SELECT id, connector_type, name, resource_version, config, created_at, updated_at FROM connectors WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_backend)?;
        row_to_connector(row)
    }

    async fn update_connector(
        &self,
        id: &str,
        mutator: Mutator<Connector>,
    ) -> StorageResult<Connector> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row = sqlx::query(
            "SELECT id, connector_type, name, resource_version, config, created_at, updated_at
             FROM connectors WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(not_found_or_backend)?;
        let current = row_to_connector(row)?;
        let updated = mutator(current)?;
        sqlx::query(
            "UPDATE connectors SET connector_type = $2, name = $3, resource_version = $4,
             config = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(&updated.id)
        .bind(&updated.connector_type)
        .bind(&updated.name)
        .bind(&updated.resource_version)
        .bind(&updated.config)
        .bind(updated.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn delete_connector(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM connectors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_connectors(&self) -> StorageResult<Vec<Connector>> {
        let rows = sqlx::query(
            "SELECT id, connector_type, name, resource_version, config, created_at, updated_at FROM connectors",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(row_to_connector).collect()
    }

    async fn create_password(&self, password: Password) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO passwords (email, password_hash, username, user_id) VALUES ($1, $2, $3, $4)",
        )
        .bind(&password.email)
        .bind(&password.password_hash)
        .bind(&password.username)
        .bind(&password.user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { StorageError::AlreadyExists } else { backend(e) })?;
        Ok(())
    }

    async fn get_password(&self, email: &str) -> StorageResult<Password> {
        let row = sqlx::query("SELECT email, password_hash, username, user_id FROM passwords WHERE email = $1")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found_or_backend)?;
        Ok(Password {
            email: row.try_get("email").map_err(backend)?,
            password_hash: row.try_get("password_hash").map_err(backend)?,
            username: row.try_get("username").map_err(backend)?,
            user_id: row.try_get("user_id").map_err(backend)?,
        })
    }

    async fn list_passwords(&self) -> StorageResult<Vec<Password>> {
        let rows = sqlx::query("SELECT email, password_hash, username, user_id FROM passwords")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter()
            .map(|row| {
                Ok(Password {
                    email: row.try_get("email").map_err(backend)?,
                    password_hash: row.try_get("password_hash").map_err(backend)?,
                    username: row.try_get("username").map_err(backend)?,
                    user_id: row.try_get("user_id").map_err(backend)?,
                })
            })
            .collect()
    }

    async fn create_auth_request(&self, req: AuthRequest) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO auth_requests (id, client_id, response_types, scopes, redirect_uri, nonce,
             state, force_approval_prompt, expiry, logged_in, claims, connector_id, connector_data, pkce, hmac_key)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(&req.id)
        .bind(&req.client_id)
        .bind(serde_json::to_value(&req.response_types).map_err(json_err)?)
        .bind(serde_json::to_value(&req.scopes).map_err(json_err)?)
        .bind(&req.redirect_uri)
        .bind(&req.nonce)
        .bind(&req.state)
        .bind(req.force_approval_prompt)
        .bind(req.expiry)
        .bind(req.logged_in)
        .bind(req.claims.as_ref().map(serde_json::to_value).transpose().map_err(json_err)?)
        .bind(&req.connector_id)
        .bind(&req.connector_data)
        .bind(req.pkce.as_ref().map(serde_json::to_value).transpose().map_err(json_err)?)
        .bind(&req.hmac_key)
        .execute(&self.pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { StorageError::AlreadyExists } else { backend(e) })?;
        Ok(())
    }

    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest> {
        let row = sqlx::query_as::<_, AuthRequestRow>(
            "SELECT id, client_id, response_types, scopes, redirect_uri, nonce, state,
             force_approval_prompt, expiry, logged_in, claims, connector_id, connector_data, pkce, hmac_key
             FROM auth_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_backend)?;
        row.try_into()
    }

    async fn update_auth_request(
        &self,
        id: &str,
        mutator: Mutator<AuthRequest>,
    ) -> StorageResult<AuthRequest> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row = sqlx::query_as::<_, AuthRequestRow>(
            "SELECT id, client_id, response_types, scopes, redirect_uri, nonce, state,
             force_approval_prompt, expiry, logged_in, claims, connector_id, connector_data, pkce, hmac_key
             FROM auth_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(not_found_or_backend)?;
        let current: AuthRequest = row.try_into()?;
        let updated = mutator(current)?;
        sqlx::query(
            "UPDATE auth_requests SET logged_in = $2, claims = $3, connector_id = $4,
             connector_data = $5, state = $6 WHERE id = $1",
        )
        .bind(&updated.id)
        .bind(updated.logged_in)
        .bind(updated.claims.as_ref().map(serde_json::to_value).transpose().map_err(json_err)?)
        .bind(&updated.connector_id)
        .bind(&updated.connector_data)
        .bind(&updated.state)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn delete_auth_request(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM auth_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn create_auth_code(&self, code: AuthCode) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO auth_codes (id, client_id, scopes, redirect_uri, nonce, claims, connector_id,
             connector_data, pkce, expiry) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(&code.id)
        .bind(&code.client_id)
        .bind(serde_json::to_value(&code.scopes).map_err(json_err)?)
        .bind(&code.redirect_uri)
        .bind(&code.nonce)
        .bind(serde_json::to_value(&code.claims).map_err(json_err)?)
        .bind(&code.connector_id)
        .bind(&code.connector_data)
        .bind(code.pkce.as_ref().map(serde_json::to_value).transpose().map_err(json_err)?)
        .bind(code.expiry)
        .execute(&self.pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { StorageError::AlreadyExists } else { backend(e) })?;
        Ok(())
    }

    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: String,
            client_id: String,
            scopes: serde_json::Value,
            redirect_uri: String,
            nonce: Option<String>,
            claims: serde_json::Value,
            connector_id: String,
            connector_data: Vec<u8>,
            pkce: Option<serde_json::Value>,
            expiry: OffsetDateTime,
        }
        let row = sqlx::query_as::<_, Row>(
            "SELECT id, client_id, scopes, redirect_uri, nonce, claims, connector_id, connector_data, pkce, expiry
             FROM auth_codes WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_backend)?;
        Ok(AuthCode {
            id: row.id,
            client_id: row.client_id,
            scopes: serde_json::from_value(row.scopes).map_err(json_err)?,
            redirect_uri: row.redirect_uri,
            nonce: row.nonce,
            claims: serde_json::from_value(row.claims).map_err(json_err)?,
            connector_id: row.connector_id,
            connector_data: row.connector_data,
            pkce: row.pkce.map(serde_json::from_value).transpose().map_err(json_err)?,
            expiry: row.expiry,
        })
    }

    async fn delete_auth_code(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM auth_codes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn create_refresh_token(&self, token: RefreshToken) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, token, obsolete_token, client_id, connector_id, scopes,
             nonce, claims, connector_data, created_at, last_used) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(&token.id)
        .bind(&token.token)
        .bind(&token.obsolete_token)
        .bind(&token.client_id)
        .bind(&token.connector_id)
        .bind(serde_json::to_value(&token.scopes).map_err(json_err)?)
        .bind(&token.nonce)
        .bind(serde_json::to_value(&token.claims).map_err(json_err)?)
        .bind(&token.connector_data)
        .bind(token.created_at)
        .bind(token.last_used)
        .execute(&self.pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { StorageError::AlreadyExists } else { backend(e) })?;
        Ok(())
    }

    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken> {
        refresh_token_row(&self.pool, id).await
    }

    async fn update_refresh_token(
        &self,
        id: &str,
        mutator: Mutator<RefreshToken>,
    ) -> StorageResult<RefreshToken> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        #[derive(sqlx::FromRow)]
        struct Row {
            id: String,
            token: String,
            obsolete_token: Option<String>,
            client_id: String,
            connector_id: String,
            scopes: serde_json::Value,
            nonce: Option<String>,
            claims: serde_json::Value,
            connector_data: Vec<u8>,
            created_at: OffsetDateTime,
            last_used: OffsetDateTime,
        }
        let row = sqlx::query_as::<_, Row>(
            "SELECT id, token, obsolete_token, client_id, connector_id, scopes, nonce, claims,
             connector_data, created_at, last_used FROM refresh_tokens WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(not_found_or_backend)?;
        let current = RefreshToken {
            id: row.id,
            token: row.token,
            obsolete_token: row.obsolete_token,
            client_id: row.client_id,
            connector_id: row.connector_id,
            scopes: serde_json::from_value(row.scopes).map_err(json_err)?,
            nonce: row.nonce,
            claims: serde_json::from_value(row.claims).map_err(json_err)?,
            connector_data: row.connector_data,
            created_at: row.created_at,
            last_used: row.last_used,
        };
        let updated = mutator(current)?;
        sqlx::query(
            "UPDATE refresh_tokens SET token = $2, obsolete_token = $3, last_used = $4 WHERE id = $1",
        )
        .bind(&updated.id)
        .bind(&updated.token)
        .bind(&updated.obsolete_token)
        .bind(updated.last_used)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_offline_session(&self, key: &str) -> StorageResult<OfflineSession> {
        offline_session_row(&self.pool, key).await
    }

    async fn upsert_offline_session(
        &self,
        key: &str,
        user_id: &str,
        connector_id: &str,
        mutator: Mutator<OfflineSession>,
    ) -> StorageResult<OfflineSession> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        #[derive(sqlx::FromRow)]
        struct Row {
            user_id: String,
            connector_id: String,
            refresh: serde_json::Value,
            connector_data: Vec<u8>,
        }
        let existing = sqlx::query_as::<_, Row>(
            "SELECT user_id, connector_id, refresh, connector_data FROM offline_sessions WHERE key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let current = match existing {
            Some(row) => OfflineSession {
                user_id: row.user_id,
                connector_id: row.connector_id,
                refresh: serde_json::from_value::<HashMap<String, RefreshTokenRef>>(row.refresh)
                    .map_err(json_err)?,
                connector_data: row.connector_data,
            },
            None => OfflineSession::new(user_id.to_string(), connector_id.to_string()),
        };
        let updated = mutator(current)?;

        sqlx::query(
            "INSERT INTO offline_sessions (key, user_id, connector_id, refresh, connector_data)
             VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT (key) DO UPDATE SET refresh = EXCLUDED.refresh, connector_data = EXCLUDED.connector_data",
        )
        .bind(key)
        .bind(&updated.user_id)
        .bind(&updated.connector_id)
        .bind(serde_json::to_value(&updated.refresh).map_err(json_err)?)
        .bind(&updated.connector_data)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn delete_offline_session(&self, key: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM offline_sessions WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_keys(&self) -> StorageResult<Keys> {
        keys_row(&self.pool).await
    }

    async fn update_keys(
        &self,
        mutator: Box<dyn FnOnce(Option<Keys>) -> StorageResult<Keys> + Send>,
    ) -> StorageResult<Keys> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        #[derive(sqlx::FromRow)]
        struct Row {
            signing_key: serde_json::Value,
            signing_key_pub: serde_json::Value,
            verification_keys: serde_json::Value,
            next_rotation: OffsetDateTime,
        }
        let existing = sqlx::query_as::<_, Row>(
            "SELECT signing_key, signing_key_pub, verification_keys, next_rotation FROM signing_keys WHERE id = 1 FOR UPDATE",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let current = existing
            .map(|row| -> StorageResult<Keys> {
                Ok(Keys {
                    signing_key: serde_json::from_value::<PrivateJwk>(row.signing_key).map_err(json_err)?,
                    signing_key_pub: serde_json::from_value::<PublicJwk>(row.signing_key_pub).map_err(json_err)?,
                    verification_keys: serde_json::from_value::<Vec<VerificationKey>>(row.verification_keys)
                        .map_err(json_err)?,
                    next_rotation: row.next_rotation,
                })
            })
            .transpose()?;

        let updated = mutator(current)?;

        sqlx::query(
            "INSERT INTO signing_keys (id, signing_key, signing_key_pub, verification_keys, next_rotation)
             VALUES (1, $1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET signing_key = EXCLUDED.signing_key,
             signing_key_pub = EXCLUDED.signing_key_pub, verification_keys = EXCLUDED.verification_keys,
             next_rotation = EXCLUDED.next_rotation",
        )
        .bind(serde_json::to_value(&updated.signing_key).map_err(json_err)?)
        .bind(serde_json::to_value(&updated.signing_key_pub).map_err(json_err)?)
        .bind(serde_json::to_value(&updated.verification_keys).map_err(json_err)?)
        .bind(updated.next_rotation)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn garbage_collect(&self, before: OffsetDateTime) -> StorageResult<GcCounts> {
        let auth_requests = sqlx::query("DELETE FROM auth_requests WHERE expiry < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();
        let auth_codes = sqlx::query("DELETE FROM auth_codes WHERE expiry < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();
        Ok(GcCounts {
            auth_requests,
            auth_codes,
        })
    }
}

fn row_to_client(row: sqlx::postgres::PgRow) -> StorageResult<Client> {
    Ok(Client {
        id: row.try_get("id").map_err(backend)?,
        secret: row.try_get("secret").map_err(backend)?,
        redirect_uris: serde_json::from_value(row.try_get("redirect_uris").map_err(backend)?)
            .map_err(json_err)?,
        trusted_peers: serde_json::from_value(row.try_get("trusted_peers").map_err(backend)?)
            .map_err(json_err)?,
        public: row.try_get("public").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        logo_url: row.try_get("logo_url").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn row_to_connector(row: sqlx::postgres::PgRow) -> StorageResult<Connector> {
    Ok(Connector {
        id: row.try_get("id").map_err(backend)?,
        connector_type: row.try_get("connector_type").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        resource_version: row.try_get("resource_version").map_err(backend)?,
        config: row.try_get("config").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

async fn refresh_token_row(pool: &PgPool, id: &str) -> StorageResult<RefreshToken> {
    #[derive(sqlx::FromRow)]
    struct Row {
        id: String,
        token: String,
        obsolete_token: Option<String>,
        client_id: String,
        connector_id: String,
        scopes: serde_json::Value,
        nonce: Option<String>,
        claims: serde_json::Value,
        connector_data: Vec<u8>,
        created_at: OffsetDateTime,
        last_used: OffsetDateTime,
    }
    let row = sqlx::query_as::<_, Row>(
        "SELECT id, token, obsolete_token, client_id, connector_id, scopes, nonce, claims,
         connector_data, created_at, last_used FROM refresh_tokens WHERE id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(not_found_or_backend)?;
    Ok(RefreshToken {
        id: row.id,
        token: row.token,
        obsolete_token: row.obsolete_token,
        client_id: row.client_id,
        connector_id: row.connector_id,
        scopes: serde_json::from_value(row.scopes).map_err(json_err)?,
        nonce: row.nonce,
        claims: serde_json::from_value(row.claims).map_err(json_err)?,
        connector_data: row.connector_data,
        created_at: row.created_at,
        last_used: row.last_used,
    })
}

async fn offline_session_row(pool: &PgPool, key: &str) -> StorageResult<OfflineSession> {
    #[derive(sqlx::FromRow)]
    struct Row {
        user_id: String,
        connector_id: String,
        refresh: serde_json::Value,
        connector_data: Vec<u8>,
    }
    let row = sqlx::query_as::<_, Row>(
        "SELECT user_id, connector_id, refresh, connector_data FROM offline_sessions WHERE key = $1",
    )
    .bind(key)
    .fetch_one(pool)
    .await
    .map_err(not_found_or_backend)?;
    Ok(OfflineSession {
        user_id: row.user_id,
        connector_id: row.connector_id,
        refresh: serde_json::from_value(row.refresh).map_err(json_err)?,
        connector_data: row.connector_data,
    })
}

async fn keys_row(pool: &PgPool) -> StorageResult<Keys> {
    #[derive(sqlx::FromRow)]
    struct Row {
        signing_key: serde_json::Value,
        signing_key_pub: serde_json::Value,
        verification_keys: serde_json::Value,
        next_rotation: OffsetDateTime,
    }
    let row = sqlx::query_as::<_, Row>(
        "SELECT signing_key, signing_key_pub, verification_keys, next_rotation FROM signing_keys WHERE id = 1",
    )
    .fetch_one(pool)
    .await
    .map_err(not_found_or_backend)?;
    Ok(Keys {
        signing_key: serde_json::from_value(row.signing_key).map_err(json_err)?,
        signing_key_pub: serde_json::from_value(row.signing_key_pub).map_err(json_err)?,
        verification_keys: serde_json::from_value(row.verification_keys).map_err(json_err)?,
        next_rotation: row.next_rotation,
    })
}
