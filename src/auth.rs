// src/auth.rs - Tokens, password hashing, the request principal and user persistence
use actix_web::dev::{Payload, ServiceRequest};
use actix_web::{web, FromRequest, HttpMessage, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};

use crate::config::AuthConfig;
use crate::db::Database;
use crate::error::{ApiError, ApiResult};

// ======== ROLES ========

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    /// Stored roles outside the known set are read as plain users.
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or(Role::User)
    }
}

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: String,
    pub name: String,
    pub dark_mode: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
    pub expire_at: DateTime<Utc>,
}

// ======== PRINCIPAL ========

/// Identity of the caller, placed in request extensions by [`jwt_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

impl From<Claims> for AuthenticatedPrincipal {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            role: claims.role,
        }
    }
}

impl AuthenticatedPrincipal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::admin_required())
        }
    }

    /// Admins may act on any account, everyone else only on their own.
    pub fn require_self_or_admin(&self, user_id: i64) -> ApiResult<()> {
        if self.is_admin() || self.user_id == user_id {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

impl FromRequest for AuthenticatedPrincipal {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedPrincipal>()
                .cloned()
                .ok_or_else(ApiError::unauthenticated),
        )
    }
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_lifetime: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            token_lifetime: Duration::hours(config.token_expiration_hours),
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        hash(password, self.bcrypt_cost).map_err(|e| {
            log::error!("Password hashing failed: {}", e);
            ApiError::InternalServerError("Gagal memproses password".to_string())
        })
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        verify(password, hash).unwrap_or_else(|e| {
            log::warn!("Stored password hash could not be verified: {}", e);
            false
        })
    }

    pub fn generate_token(&self, user: &User) -> ApiResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expire_at = now + self.token_lifetime;

        let claims = Claims {
            user_id: user.id,
            username: user.username.clone(),
            role: Role::from_stored(&user.role),
            exp: expire_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            log::error!("Token encoding failed: {}", e);
            ApiError::InternalServerError("Gagal membuat token".to_string())
        })?;
        Ok((token, expire_at))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("Token tidak valid: token sudah kedaluwarsa".to_string())
                }
                _ => ApiError::Unauthorized(format!("Token tidak valid: {}", err)),
            })
    }

    pub fn issue(&self, user: User) -> ApiResult<AuthResponse> {
        let (token, expire_at) = self.generate_token(&user)?;
        Ok(AuthResponse { token, user, expire_at })
    }
}

// ======== USER PERSISTENCE ========

const USER_COLUMNS: &str = "id, username, password, role, name, dark_mode, created_at, updated_at";

fn map_write_error(err: sqlx::Error) -> ApiError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => ApiError::username_taken(),
        _ => ApiError::DatabaseError(err),
    }
}

impl User {
    pub fn role(&self) -> Role {
        Role::from_stored(&self.role)
    }

    pub async fn find_by_username(db: &Database, username: &str) -> ApiResult<Option<User>> {
        let raw = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
        let sql = db.sql(&raw);
        let user = crate::dispatch!(db, pool => {
            sqlx::query_as::<_, User>(&sql).bind(username).fetch_optional(pool).await
        })?;
        Ok(user)
    }

    pub async fn find_by_id(db: &Database, id: i64) -> ApiResult<Option<User>> {
        let raw = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let sql = db.sql(&raw);
        let user = crate::dispatch!(db, pool => {
            sqlx::query_as::<_, User>(&sql).bind(id).fetch_optional(pool).await
        })?;
        Ok(user)
    }

    /// Newest accounts first.
    pub async fn list(db: &Database) -> ApiResult<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY id DESC", USER_COLUMNS);
        let users = crate::dispatch!(db, pool => {
            sqlx::query_as::<_, User>(&sql).fetch_all(pool).await
        })?;
        Ok(users)
    }

    pub async fn count(db: &Database) -> ApiResult<i64> {
        let count = crate::dispatch!(db, pool => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(pool).await
        })?;
        Ok(count)
    }

    pub async fn create(db: &Database, new_user: NewUser) -> ApiResult<User> {
        let now = Utc::now().naive_utc();
        let sql = db.sql(
            "INSERT INTO users (username, password, role, name, dark_mode, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        );

        crate::dispatch!(db, pool => {
            sqlx::query(&sql)
                .bind(&new_user.username)
                .bind(&new_user.password_hash)
                .bind(new_user.role.to_string())
                .bind(&new_user.name)
                .bind(false)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .map(|_| ())
        })
        .map_err(map_write_error)?;

        Self::find_by_username(db, &new_user.username)
            .await?
            .ok_or_else(|| ApiError::InternalServerError("Pengguna gagal dibuat".to_string()))
    }

    /// Writes username, password hash, role and name back, bumping `updated_at`.
    pub async fn save(&mut self, db: &Database) -> ApiResult<()> {
        self.updated_at = Utc::now().naive_utc();
        let sql = db.sql(
            "UPDATE users SET username = ?, password = ?, role = ?, name = ?, updated_at = ? \
             WHERE id = ?",
        );

        crate::dispatch!(db, pool => {
            sqlx::query(&sql)
                .bind(&self.username)
                .bind(&self.password)
                .bind(&self.role)
                .bind(&self.name)
                .bind(self.updated_at)
                .bind(self.id)
                .execute(pool)
                .await
                .map(|_| ())
        })
        .map_err(map_write_error)
    }

    pub async fn set_dark_mode(&mut self, db: &Database, enabled: bool) -> ApiResult<()> {
        self.dark_mode = enabled;
        self.updated_at = Utc::now().naive_utc();
        let sql = db.sql("UPDATE users SET dark_mode = ?, updated_at = ? WHERE id = ?");

        crate::dispatch!(db, pool => {
            sqlx::query(&sql)
                .bind(enabled)
                .bind(self.updated_at)
                .bind(self.id)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    /// Returns false when no row matched.
    pub async fn delete(db: &Database, id: i64) -> ApiResult<bool> {
        let sql = db.sql("DELETE FROM users WHERE id = ?");
        let affected = crate::dispatch!(db, pool => {
            sqlx::query(&sql).bind(id).execute(pool).await.map(|r| r.rows_affected())
        })?;
        Ok(affected > 0)
    }
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let auth_service = match req.app_data::<web::Data<Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Layanan autentikasi tidak tersedia".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(credentials.token()) {
        Ok(claims) => {
            req.extensions_mut().insert(AuthenticatedPrincipal::from(claims));
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}
