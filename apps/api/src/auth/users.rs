use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::user::User;

const RESET_TOKEN_BYTES: usize = 32;

/// Reset tokens stay valid for one hour.
pub fn reset_token_ttl() -> Duration {
    Duration::hours(1)
}

/// 32 random bytes, hex encoded.
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn reset_token_usable(user: &User, now: DateTime<Utc>) -> bool {
    matches!(user.reset_expires, Some(expires) if expires >= now)
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_reset_token(pool: &PgPool, token: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE reset_token = $1")
        .bind(token)
        .fetch_optional(pool)
        .await
}

/// Inserts a new user. Returns `None` when the email is already registered.
pub async fn create_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    let inserted = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, password_hash)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .fetch_optional(pool)
    .await?;
    Ok(inserted)
}

pub async fn set_reset_token(
    pool: &PgPool,
    user_id: Uuid,
    token: &str,
    expires: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET reset_token = $2, reset_expires = $3 WHERE id = $1")
        .bind(user_id)
        .bind(token)
        .bind(expires)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stores the new hash and invalidates the reset token in one statement.
pub async fn replace_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $2, reset_token = NULL, reset_expires = NULL
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(password_hash)
    .execute(pool)
    .await?;
    Ok(())
}
