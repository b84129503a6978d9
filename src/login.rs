//! Accounts, roles and cookie sessions.
//!
//! The wire types (`Role`, `Theme`, `UserInfo`, `AuthStatus`) are shared by the
//! REST client and the server. The password store and session table need the
//! `web` feature.

#[cfg(feature = "web")]
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
#[cfg(feature = "web")]
use std::collections::HashMap;
#[cfg(feature = "web")]
use std::fs;
#[cfg(feature = "web")]
use std::path::{Path, PathBuf};
#[cfg(feature = "web")]
use std::sync::RwLock;
#[cfg(feature = "web")]
use std::time::{Duration, SystemTime};
use thiserror::Error;
#[cfg(feature = "web")]
use tracing::{info, warn};
#[cfg(feature = "web")]
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

/// Account role. Admin and staff may edit tables; users may only read.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    #[default]
    User,
}

impl Role {
    pub fn can_edit(self) -> bool {
        matches!(self, Role::Admin | Role::Staff)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// The public view of an account.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct UserInfo {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub theme: Theme,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

/// Login body. `username` may also hold the account's e-mail address.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("username, email and password cannot be empty")]
    MissingFields,
    #[error("username already exists")]
    UsernameTaken,
    #[error("email address is already registered")]
    EmailTaken,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("password hashing failed")]
    Hash,
    #[error("user database error: {0}")]
    Io(#[from] std::io::Error),
    #[error("user database is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A stored account.
#[cfg(feature = "web")]
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub theme: Theme,
}

#[cfg(feature = "web")]
impl User {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            theme: self.theme,
        }
    }
}

/// Accounts kept in a pretty-printed JSON file, keyed by username.
#[cfg(feature = "web")]
#[derive(Debug)]
pub struct UserStore {
    path: PathBuf,
    users: RwLock<HashMap<String, User>>,
}

#[cfg(feature = "web")]
impl UserStore {
    /// Open (or create) the users file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LoginError> {
        let path = path.into();
        let users = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, b"{}")?;
            HashMap::new()
        };
        Ok(UserStore {
            path,
            users: RwLock::new(users),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Create an account. The password is hashed with Argon2 before it is stored.
    pub fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<UserInfo, LoginError> {
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(LoginError::MissingFields);
        }

        let mut users = self.write();
        if users.contains_key(username) {
            return Err(LoginError::UsernameTaken);
        }
        if users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(LoginError::EmailTaken);
        }

        let user = User {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            role,
            theme: Theme::default(),
        };
        let info = user.info();
        users.insert(username.to_string(), user);
        self.save(&users)?;
        info!(username, ?role, "registered user");
        Ok(info)
    }

    /// Check credentials. `login` matches a username or an e-mail address.
    pub fn verify(&self, login: &str, password: &str) -> Result<UserInfo, LoginError> {
        let users = self.read();
        let user = users
            .get(login)
            .or_else(|| users.values().find(|u| u.email.eq_ignore_ascii_case(login)))
            .ok_or(LoginError::InvalidCredentials)?;

        if verify_password(password, &user.password_hash)? {
            Ok(user.info())
        } else {
            Err(LoginError::InvalidCredentials)
        }
    }

    pub fn get(&self, username: &str) -> Option<UserInfo> {
        self.read().get(username).map(User::info)
    }

    pub fn set_theme(&self, username: &str, theme: Theme) -> Result<UserInfo, LoginError> {
        let mut users = self.write();
        let user = users
            .get_mut(username)
            .ok_or(LoginError::InvalidCredentials)?;
        user.theme = theme;
        let info = user.info();
        self.save(&users)?;
        Ok(info)
    }

    fn save(&self, users: &HashMap<String, User>) -> Result<(), LoginError> {
        let json = serde_json::to_string_pretty(users)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, User>> {
        self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, User>> {
        self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(feature = "web")]
fn hash_password(password: &str) -> Result<String, LoginError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| LoginError::Hash)
}

#[cfg(feature = "web")]
fn verify_password(password: &str, hash: &str) -> Result<bool, LoginError> {
    let parsed = PasswordHash::new(hash).map_err(|_| LoginError::Hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(feature = "web")]
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: SystemTime,
}

/// Live sessions keyed by a random uuid, held by the server state.
#[cfg(feature = "web")]
#[derive(Debug)]
pub struct SessionStore {
    lifetime: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

#[cfg(feature = "web")]
impl SessionStore {
    pub fn new(lifetime: Duration) -> Self {
        SessionStore {
            lifetime,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session {
            username: username.to_string(),
            expires_at: SystemTime::now() + self.lifetime,
        };
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone(), session);
        id
    }

    /// The username behind a live session. Expired sessions are dropped.
    pub fn validate(&self, id: &str) -> Option<String> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match sessions.get(id) {
            Some(session) if session.expires_at > SystemTime::now() => Some(session.username.clone()),
            Some(_) => {
                warn!("session expired");
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn destroy(&self, id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }
}
