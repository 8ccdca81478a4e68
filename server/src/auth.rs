use crate::db::Db;
use crate::error::ChatError;
use crate::users;
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use chat_protocol::UserProfile;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration as StdDuration, Instant},
};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Hash a password using argon2id.
pub fn hash_password(pass: &str) -> Result<String, ChatError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| ChatError::Internal(format!("password hashing failed: {e}")))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Claims stored within issued JWTs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Issue a JWT for a given subject valid for the provided duration.
pub fn issue_jwt(secret: &[u8], sub: &str, valid_for: Duration) -> Result<String, ChatError> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: sub.into(),
        exp,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| ChatError::Internal(format!("token signing failed: {e}")))
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims, ChatError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| ChatError::Authentication(e.to_string()))?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        return Err(ChatError::Authentication("expired".into()));
    }
    Ok(data.claims)
}

/// Simple in-memory login rate limiter.
#[derive(Clone)]
pub struct LoginRateLimiter {
    inner: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max: usize,
    window: StdDuration,
}

impl LoginRateLimiter {
    pub fn new(max: usize, window: StdDuration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max,
            window,
        }
    }

    /// Returns true if the attempt is allowed, false if rate limited.
    pub async fn check(&self, key: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let entry = guard.entry(key.to_lowercase()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max {
            return false;
        }
        entry.push(now);
        true
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(5, StdDuration::from_secs(60))
    }
}

/// The user a session or request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub user_name: String,
}

impl From<&UserProfile> for Identity {
    fn from(p: &UserProfile) -> Self {
        Self {
            user_id: p.id,
            user_name: p.name.clone(),
        }
    }
}

/// Issues bearer tokens and resolves them back to existing users.
#[derive(Clone)]
pub struct Authenticator {
    db: Db,
    secret: Arc<Vec<u8>>,
    ttl: Duration,
}

impl Authenticator {
    pub fn new(db: Db, secret: Vec<u8>, ttl: Duration) -> Self {
        Self {
            db,
            secret: Arc::new(secret),
            ttl,
        }
    }

    pub fn issue(&self, user: &UserProfile) -> Result<String, ChatError> {
        issue_jwt(&self.secret, &user.id.to_string(), self.ttl)
    }

    /// Resolve a bearer token. Missing, invalid or expired tokens and tokens
    /// for users that no longer exist all fail with `Authentication`.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, ChatError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChatError::Authentication("missing token".into()))?;
        let claims = verify_jwt(&self.secret, token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ChatError::Authentication("malformed subject".into()))?;
        let profile = self
            .db
            .run(move |conn| users::find_profile(conn, &user_id))
            .await?
            .ok_or_else(|| ChatError::Authentication("unknown user".into()))?;
        debug!(user_id = %profile.id, "token accepted");
        Ok(Identity::from(&profile))
    }

    /// Create an account and return a token for it.
    pub async fn register(
        &self,
        name: String,
        email: String,
        password: String,
    ) -> Result<(String, UserProfile), ChatError> {
        if password.len() < 6 {
            return Err(ChatError::Validation(
                "password must be at least 6 characters".into(),
            ));
        }
        let profile = self
            .db
            .run(move |conn| {
                let hash = hash_password(&password)?;
                users::create_user(conn, &name, &email, &hash)
            })
            .await?;
        Ok((self.issue(&profile)?, profile))
    }

    /// Check credentials and return a fresh token.
    pub async fn login(&self, email: String, password: String) -> Result<(String, UserProfile), ChatError> {
        let profile = self
            .db
            .run(move |conn| {
                let found = users::find_credentials(conn, &email)?;
                Ok(found.and_then(|(profile, hash)| verify_password(&password, &hash).then_some(profile)))
            })
            .await?
            .ok_or_else(|| ChatError::Authentication("invalid credentials".into()))?;
        Ok((self.issue(&profile)?, profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("secret").unwrap();
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("bad", &hash));
        assert!(!verify_password("secret", "not-a-hash"));
    }

    #[test]
    fn jwt_issue_and_verify() {
        let secret = b"secret";
        let token = issue_jwt(secret, "user", Duration::seconds(60)).unwrap();
        let claims = verify_jwt(secret, &token).unwrap();
        assert_eq!(claims.sub, "user");
        assert!(verify_jwt(b"other", &token).is_err());
    }

    #[test]
    fn jwt_expiry() {
        let secret = b"secret";
        let token = issue_jwt(secret, "user", Duration::seconds(-10)).unwrap();
        assert!(matches!(
            verify_jwt(secret, &token),
            Err(ChatError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn rate_limiter_blocks() {
        let limiter = LoginRateLimiter::new(2, StdDuration::from_secs(60));
        assert!(limiter.check("u@example.com").await);
        assert!(limiter.check("U@example.com").await);
        assert!(!limiter.check("u@example.com").await);
        assert!(limiter.check("v@example.com").await);
    }

    async fn authenticator() -> (tempfile::TempDir, Authenticator) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(tmp.path().join("a.db")).unwrap();
        (tmp, Authenticator::new(db, b"k".to_vec(), Duration::hours(1)))
    }

    #[tokio::test]
    async fn register_login_authenticate() {
        let (_tmp, auth) = authenticator().await;
        let (token, alice) = auth
            .register("Alice".into(), "alice@example.com".into(), "hunter22".into())
            .await
            .unwrap();
        let who = auth.authenticate(Some(&token)).await.unwrap();
        assert_eq!(who.user_id, alice.id);
        assert_eq!(who.user_name, "Alice");
        let (_, again) = auth
            .login("alice@example.com".into(), "hunter22".into())
            .await
            .unwrap();
        assert_eq!(again.id, alice.id);
        assert!(matches!(
            auth.login("alice@example.com".into(), "wrong".into()).await,
            Err(ChatError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn rejects_missing_bad_and_orphaned_tokens() {
        let (_tmp, auth) = authenticator().await;
        assert!(matches!(auth.authenticate(None).await, Err(ChatError::Authentication(_))));
        assert!(matches!(
            auth.authenticate(Some("garbage")).await,
            Err(ChatError::Authentication(_))
        ));
        let ghost = UserProfile {
            id: Uuid::new_v4(),
            name: "ghost".into(),
            email: "ghost@example.com".into(),
            avatar: None,
            is_online: false,
            last_seen: None,
        };
        let token = auth.issue(&ghost).unwrap();
        assert!(matches!(
            auth.authenticate(Some(&token)).await,
            Err(ChatError::Authentication(_))
        ));
    }
}
