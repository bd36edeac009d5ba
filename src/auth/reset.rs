//! Password reset tokens.
//!
//! A user moves from `NoPendingReset` to `Requested` when a token is issued.
//! Consuming the token clears it. An unconsumed token simply goes stale once
//! its expiry passes: nothing sweeps it, lookups just stop matching it, and the
//! next request overwrites it.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};

use super::password::hash_password;
use crate::{
    catalog::{Catalog, User},
    error::{AppError, NO_ACCOUNT, RESET_INVALID},
    mail::MailMessage,
    state::AppState,
};

pub const RESET_TEMPLATE: &str = "password-reset";
const TOKEN_BYTES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    NoPendingReset,
    Requested { expires: OffsetDateTime },
    Expired,
}

impl ResetState {
    pub fn of(user: &User, now: OffsetDateTime) -> Self {
        match (&user.reset_password_token, user.reset_password_expires) {
            (Some(_), Some(expires)) if expires > now => ResetState::Requested { expires },
            (Some(_), Some(_)) => ResetState::Expired,
            _ => ResetState::NoPendingReset,
        }
    }
}

/// 20 bytes from the OS RNG, base64url without padding.
pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    Base64UrlUnpadded::encode_string(&buf)
}

/// Issues a token for `email` and mails the reset link.
#[instrument(skip(state))]
pub async fn request(state: &AppState, email: &str) -> Result<(), AppError> {
    let email = email.trim().to_lowercase();
    let Some(user) = state.catalog.find_user_by_email(&email).await? else {
        warn!("password reset requested for unknown email");
        return Err(AppError::AuthResetInvalid(NO_ACCOUNT));
    };

    let now = OffsetDateTime::now_utc();
    if ResetState::of(&user, now) != ResetState::NoPendingReset {
        debug!(user_id = %user.id, "replacing previous reset token");
    }

    let token = generate_token();
    let expires = now + Duration::minutes(state.config.reset_ttl_minutes);
    state
        .catalog
        .set_reset_token(user.id, &token, expires)
        .await?;

    let reset_url = format!(
        "{}/account/reset/{}",
        state.config.public_url.trim_end_matches('/'),
        token
    );
    state
        .mailer
        .send(MailMessage {
            recipient: user.email.clone(),
            subject: "Password Reset".into(),
            template: RESET_TEMPLATE,
            reset_url,
        })
        .await?;

    info!(user_id = %user.id, "password reset requested");
    Ok(())
}

/// The user holding a live `token`. Wrong and expired tokens fail identically.
pub async fn validate(catalog: &dyn Catalog, token: &str) -> Result<User, AppError> {
    catalog
        .find_user_by_reset_token(token, OffsetDateTime::now_utc())
        .await?
        .ok_or(AppError::AuthResetInvalid(RESET_INVALID))
}

/// Replaces the password of the user holding `token` and clears the token.
/// Callers run [`super::password::confirm_match`] first.
#[instrument(skip(catalog, token, new_password))]
pub async fn consume(
    catalog: &dyn Catalog,
    token: &str,
    new_password: &str,
) -> Result<User, AppError> {
    let user = validate(catalog, token).await?;
    let hash = hash_password(new_password)?;
    let user = catalog
        .complete_password_reset(user.id, token, &hash)
        .await?
        // Consumed concurrently between lookup and update.
        .ok_or(AppError::AuthResetInvalid(RESET_INVALID))?;
    info!(user_id = %user.id, "password reset completed");
    Ok(user)
}
