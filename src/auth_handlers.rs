// src/auth_handlers.rs - Login, registration, profile, settings and user management routes

use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use validator::Validate;

use crate::auth::{AuthService, AuthenticatedPrincipal, NewUser, Role, User};
use crate::db::Connections;
use crate::error::{method_not_allowed, ApiError, ApiResult};

const REQUIRED_FIELDS: &str = "Username, password, dan nama wajib diisi";

// ======== REQUEST STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Username wajib diisi"))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password wajib diisi"))]
    pub password: String,
}

/// Used by both self-registration and admin account creation.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "Username wajib diisi"))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password wajib diisi"))]
    pub password: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "Nama wajib diisi"))]
    pub name: String,
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100, message = "Username tidak boleh kosong"))]
    pub username: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DarkModeRequest {
    #[serde(default)]
    pub dark_mode: Value,
}

// ======== HELPERS ========

fn parse_role(value: Option<&str>) -> ApiResult<Role> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Role::User),
        Some(s) => s
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Role '{}' tidak dikenal", s))),
    }
}

fn parse_user_id(raw: &str) -> ApiResult<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(ApiError::invalid_user_id)
}

/// Accepts a JSON boolean, any number (non-zero is on) or the strings
/// "true"/"1". Other strings read as off; other JSON types are rejected.
pub fn parse_dark_mode(value: &Value) -> ApiResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map_or(false, |f| f != 0.0)),
        Value::String(s) => Ok(s == "true" || s == "1"),
        other => {
            let type_name = match other {
                Value::Null => "null",
                Value::Array(_) => "array",
                _ => "object",
            };
            Err(ApiError::BadRequest(format!(
                "Tipe data dark_mode tidak didukung: {}",
                type_name
            )))
        }
    }
}

fn validate_required(request: &RegisterRequest) -> ApiResult<()> {
    request.validate().map_err(|e| {
        log::debug!("Rejected account payload: {}", e);
        ApiError::bad_request(REQUIRED_FIELDS)
    })
}

async fn create_account(
    connections: &Connections,
    auth_service: &AuthService,
    request: RegisterRequest,
    role: Role,
) -> ApiResult<User> {
    let db = connections.primary()?;

    if User::find_by_username(db, &request.username).await?.is_some() {
        return Err(ApiError::username_taken());
    }

    let password_hash = auth_service.hash_password(&request.password)?;
    User::create(
        db,
        NewUser {
            username: request.username,
            password_hash,
            role,
            name: request.name,
        },
    )
    .await
}

async fn load_user(connections: &Connections, id: i64) -> ApiResult<User> {
    User::find_by_id(connections.primary()?, id)
        .await?
        .ok_or_else(ApiError::user_not_found)
}

// ======== AUTH HANDLERS ========

pub async fn login(
    connections: web::Data<Connections>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let request = request.into_inner();
    let invalid = || ApiError::Unauthorized("Username atau password salah".to_string());
    request.validate().map_err(|_| invalid())?;

    let user = User::find_by_username(connections.primary()?, &request.username)
        .await?
        .ok_or_else(invalid)?;

    if !auth_service.verify_password(&request.password, &user.password) {
        log::warn!("Failed login attempt for {}", request.username);
        return Err(invalid());
    }

    log::info!("User {} logged in", user.username);
    Ok(HttpResponse::Ok().json(auth_service.issue(user)?))
}

/// Public self-registration. Only plain user accounts can be created here.
pub async fn register(
    connections: web::Data<Connections>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    let request = request.into_inner();
    validate_required(&request)?;

    if parse_role(request.role.as_deref())? != Role::User {
        return Err(ApiError::Forbidden(
            "Pendaftaran mandiri hanya untuk role user".to_string(),
        ));
    }

    let user = create_account(&connections, &auth_service, request, Role::User).await?;
    log::info!("New user registered: {}", user.username);
    Ok(HttpResponse::Created().json(auth_service.issue(user)?))
}

pub async fn profile(
    connections: web::Data<Connections>,
    principal: AuthenticatedPrincipal,
) -> ApiResult<HttpResponse> {
    let user = load_user(&connections, principal.user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

// ======== SETTINGS ========

pub async fn get_settings(
    connections: web::Data<Connections>,
    principal: AuthenticatedPrincipal,
) -> ApiResult<HttpResponse> {
    let user = load_user(&connections, principal.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "dark_mode": user.dark_mode })))
}

pub async fn update_dark_mode(
    connections: web::Data<Connections>,
    principal: AuthenticatedPrincipal,
    request: web::Json<DarkModeRequest>,
) -> ApiResult<HttpResponse> {
    let enabled = parse_dark_mode(&request.dark_mode)?;
    let mut user = load_user(&connections, principal.user_id).await?;
    user.set_dark_mode(connections.primary()?, enabled).await?;

    log::info!("User {} set dark mode to {}", user.id, enabled);
    Ok(HttpResponse::Ok().json(json!({
        "message": "Preferensi dark mode diperbarui",
        "dark_mode": user.dark_mode,
        "user_id": user.id,
    })))
}

// ======== USER MANAGEMENT ========

pub async fn list_users(
    connections: web::Data<Connections>,
    principal: AuthenticatedPrincipal,
) -> ApiResult<HttpResponse> {
    principal.require_admin()?;
    let users = User::list(connections.primary()?).await?;
    Ok(HttpResponse::Ok().json(users))
}

pub async fn create_user(
    connections: web::Data<Connections>,
    auth_service: web::Data<Arc<AuthService>>,
    principal: AuthenticatedPrincipal,
    request: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    principal.require_admin()?;
    let request = request.into_inner();
    validate_required(&request)?;
    let role = parse_role(request.role.as_deref())?;

    let user = create_account(&connections, &auth_service, request, role).await?;
    log::info!("Admin {} created user {} ({})", principal.username, user.username, role);
    Ok(HttpResponse::Created().json(user))
}

pub async fn get_user(
    connections: web::Data<Connections>,
    principal: AuthenticatedPrincipal,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let id = parse_user_id(&path)?;
    principal.require_self_or_admin(id)?;
    Ok(HttpResponse::Ok().json(load_user(&connections, id).await?))
}

/// Role changes are silently ignored for non-admins; a username change by a
/// non-admin is refused.
pub async fn update_user(
    connections: web::Data<Connections>,
    auth_service: web::Data<Arc<AuthService>>,
    principal: AuthenticatedPrincipal,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
) -> ApiResult<HttpResponse> {
    let id = parse_user_id(&path)?;
    principal.require_self_or_admin(id)?;
    let request = request.into_inner();
    request.validate()?;

    let db = connections.primary()?;
    let mut user = load_user(&connections, id).await?;

    if let Some(name) = request.name.filter(|n| !n.is_empty()) {
        user.name = name;
    }
    if let Some(password) = request.password.filter(|p| !p.is_empty()) {
        user.password = auth_service.hash_password(&password)?;
    }
    if principal.is_admin() {
        if let Some(role) = request.role.as_deref().filter(|r| !r.is_empty()) {
            user.role = parse_role(Some(role))?.to_string();
        }
    }
    if let Some(username) = request.username.filter(|u| *u != user.username) {
        if !principal.is_admin() {
            return Err(ApiError::Forbidden(
                "Tidak memiliki izin untuk mengubah username".to_string(),
            ));
        }
        if User::find_by_username(db, &username).await?.is_some() {
            return Err(ApiError::username_taken());
        }
        user.username = username;
    }

    user.save(db).await?;
    log::info!("User {} updated by {}", user.id, principal.username);
    Ok(HttpResponse::Ok().json(user))
}

pub async fn delete_user(
    connections: web::Data<Connections>,
    principal: AuthenticatedPrincipal,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let id = parse_user_id(&path)?;
    principal.require_admin()?;
    if id == principal.user_id {
        return Err(ApiError::Forbidden(
            "Tidak dapat menghapus akun Anda sendiri".to_string(),
        ));
    }

    if !User::delete(connections.primary()?, id).await? {
        return Err(ApiError::user_not_found());
    }

    log::info!("Admin {} deleted user {}", principal.username, id);
    Ok(HttpResponse::Ok().json(json!({ "message": "Pengguna berhasil dihapus" })))
}

// ======== ROUTING ========

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        log::debug!("Rejected JSON body: {}", err);
        ApiError::bad_request("Format JSON tidak valid").into()
    })
}

/// Public authentication routes.
pub fn configure_public(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/auth/login")
            .route(web::post().to(login))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/auth/register")
            .route(web::post().to(register))
            .default_service(web::to(method_not_allowed)),
    );
}

/// Routes that expect an [`AuthenticatedPrincipal`]; mount inside the bearer middleware.
pub fn configure_protected(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/profile")
            .route(web::get().to(profile))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/user/settings")
            .route(web::get().to(get_settings))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/user/settings/dark-mode")
            .route(web::post().to(update_dark_mode))
            .route(web::put().to(update_dark_mode))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/users")
            .route(web::get().to(list_users))
            .route(web::post().to(create_user))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/users/{id}")
            .route(web::get().to(get_user))
            .route(web::put().to(update_user))
            .route(web::delete().to(delete_user))
            .default_service(web::to(method_not_allowed)),
    );
}
