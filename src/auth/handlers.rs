use axum::{
    extract::{FromRef, Path, State},
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use super::{
    dto::{
        AuthResponse, ForgotRequest, LoginRequest, MessageResponse, PublicUser, RefreshRequest,
        RegisterRequest, ResetPasswordRequest,
    },
    jwt::{AuthUser, JwtKeys},
    password::{check_strength, confirm_match, hash_password, verify_password},
    reset,
};
use crate::{
    catalog::{DuplicateEmail, User},
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/me", get(get_me))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/account/forgot", post(forgot))
        .route("/account/reset/:token", get(check_reset).post(reset_password))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn authenticated(state: &AppState, user: User) -> Result<Json<AuthResponse>, AppError> {
    let tokens = JwtKeys::from_ref(state).issue_pair(user.id)?;
    Ok(Json(AuthResponse {
        tokens,
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AppError::Validation {
            field: "email",
            reason: "is not a valid address",
        });
    }
    check_strength(&payload.password)?;
    confirm_match(&payload.password, &payload.password_confirm)?;

    let hash = hash_password(&payload.password)?;
    let user = match state.catalog.insert_user(&payload.email, &hash).await {
        Ok(user) => user,
        // The unique email constraint decides, so concurrent sign-ups cannot both win.
        Err(e) if e.is::<DuplicateEmail>() => {
            warn!(email = %payload.email, "email already registered");
            return Err(AppError::EmailTaken);
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %user.id, email = %user.email, "user registered");
    authenticated(&state, user)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.email = payload.email.trim().to_lowercase();

    let Some(user) = state.catalog.find_user_by_email(&payload.email).await? else {
        warn!(email = %payload.email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    authenticated(&state, user)
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let claims = JwtKeys::from_ref(&state)
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| {
            warn!(error = %e, "refresh rejected");
            AppError::InvalidCredentials
        })?;

    let user = state
        .catalog
        .find_user(claims.sub)
        .await?
        .ok_or(AppError::InvalidCredentials)?;
    authenticated(&state, user)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = state
        .catalog
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn forgot(
    State(state): State<AppState>,
    Json(payload): Json<ForgotRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    reset::request(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: "You have been emailed a password reset link.",
    }))
}

#[instrument(skip_all)]
pub async fn check_reset(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    reset::validate(state.catalog.as_ref(), &token).await?;
    Ok(Json(MessageResponse {
        message: "Reset your password",
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    confirm_match(&payload.password, &payload.password_confirm)?;
    check_strength(&payload.password)?;
    let user = reset::consume(state.catalog.as_ref(), &token, &payload.password).await?;
    authenticated(&state, user)
}
