//! Identity and session handling.
//!
//! `AuthGateway` is the seam to whatever keeps the accounts. `PgAuthGateway`
//! talks to the school's Postgres store, where credentials are bcrypt hashes
//! checked with pgcrypto. `SessionStore` owns the one piece of shared auth
//! state in the process: it is created explicitly, restored with `init`,
//! observed through a `watch` channel, and closed with `teardown`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{AuthError, GatewayError};
use crate::models::{NewUser, User};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: Uuid,
    pub account_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    SignedOut,
    SignedIn { session: Session, user: User },
}

impl AuthState {
    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::SignedIn { user, .. } => Some(user),
            AuthState::SignedOut => None,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait AuthGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<(Session, User), AuthError>;

    async fn sign_up(
        &self,
        password: &str,
        profile: &NewUser,
    ) -> Result<(Session, User), AuthError>;

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError>;

    /// Looks a stored token up again; `None` once it has been revoked.
    async fn current_session(&self, token: Uuid) -> Result<Option<Session>, AuthError>;

    async fn profile(&self, account_id: Uuid) -> Result<User, AuthError>;
}

pub struct PgAuthGateway {
    pool: PgPool,
}

impl PgAuthGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn open_session(&self, account_id: Uuid, email: &str) -> Result<Session, AuthError> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO incident_tracker.sessions (token, account_id) VALUES ($1, $2)")
            .bind(token)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(Session {
            token,
            account_id,
            email: email.to_string(),
        })
    }
}

impl AuthGateway for PgAuthGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<(Session, User), AuthError> {
        let row = sqlx::query(
            r#"
            SELECT id FROM incident_tracker.accounts
            WHERE email = $1 AND password_hash = crypt($2, password_hash)
            "#,
        )
        .bind(email)
        .bind(password)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
        let account_id: Uuid = row.try_get("id")?;

        let user = self.profile(account_id).await?;
        let session = self.open_session(account_id, email).await?;
        db::touch_last_login(&self.pool, account_id).await?;
        info!(user_id = %account_id, "signed in");
        Ok((session, user))
    }

    async fn sign_up(
        &self,
        password: &str,
        profile: &NewUser,
    ) -> Result<(Session, User), AuthError> {
        let settings = db::get_settings(&self.pool).await?;
        if !settings.allows_email(&profile.email) {
            return Err(AuthError::DomainNotAllowed(profile.email.clone()));
        }

        let mut tx = self.pool.begin().await?;
        // Invited staff already have a profile; their account takes its id.
        let invited: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM incident_tracker.users WHERE email = $1")
                .bind(&profile.email)
                .fetch_optional(&mut *tx)
                .await?;
        let account_id = invited.unwrap_or_else(Uuid::new_v4);
        // Either the email or the invited profile id may already hold an account.
        let inserted = sqlx::query(
            r#"
            INSERT INTO incident_tracker.accounts (id, email, password_hash)
            VALUES ($1, $2, crypt($3, gen_salt('bf')))
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(&profile.email)
        .bind(password)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(AuthError::AlreadyRegistered(profile.email.clone()));
        }
        if invited.is_none() {
            db::insert_user(&mut *tx, account_id, profile).await?;
        }
        tx.commit().await?;

        let user = self.profile(account_id).await?;
        let session = self.open_session(account_id, &profile.email).await?;
        info!(user_id = %account_id, "account registered");
        Ok((session, user))
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM incident_tracker.sessions WHERE token = $1")
            .bind(session.token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn current_session(&self, token: Uuid) -> Result<Option<Session>, AuthError> {
        let row = sqlx::query(
            r#"
            SELECT s.token, s.account_id, a.email
            FROM incident_tracker.sessions s
            JOIN incident_tracker.accounts a ON a.id = s.account_id
            WHERE s.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Session {
                token: row.try_get("token")?,
                account_id: row.try_get("account_id")?,
                email: row.try_get("email")?,
            })),
            None => Ok(None),
        }
    }

    async fn profile(&self, account_id: Uuid) -> Result<User, AuthError> {
        match db::get_user(&self.pool, account_id).await {
            Ok(user) => Ok(user),
            Err(GatewayError::NotFound { .. }) => Err(AuthError::MissingProfile(account_id)),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-wide auth state with an explicit lifecycle.
pub struct SessionStore<G> {
    gateway: G,
    token_file: Option<PathBuf>,
    state: watch::Sender<AuthState>,
}

impl<G: AuthGateway> SessionStore<G> {
    /// `token_file` keeps the session between runs; `None` keeps it in memory only.
    pub fn new(gateway: G, token_file: Option<PathBuf>) -> Self {
        let (state, _) = watch::channel(AuthState::SignedOut);
        Self {
            gateway,
            token_file,
            state,
        }
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Result<User, AuthError> {
        self.state
            .borrow()
            .user()
            .cloned()
            .ok_or(AuthError::NotSignedIn)
    }

    /// Restores a saved session. A profile that cannot be fetched leaves the
    /// store signed out instead of failing.
    pub async fn init(&self) -> Result<AuthState, AuthError> {
        let Some(saved) = self.read_token()? else {
            self.publish(AuthState::SignedOut);
            return Ok(AuthState::SignedOut);
        };

        let Some(session) = self.gateway.current_session(saved.token).await? else {
            debug!("stored session is no longer valid");
            self.forget_token()?;
            self.publish(AuthState::SignedOut);
            return Ok(AuthState::SignedOut);
        };

        let state = match self.gateway.profile(session.account_id).await {
            Ok(user) => AuthState::SignedIn { session, user },
            Err(err) => {
                warn!(error = %err, "could not load profile, continuing signed out");
                AuthState::SignedOut
            }
        };
        self.publish(state.clone());
        Ok(state)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let (session, user) = self.gateway.sign_in(email, password).await?;
        self.save_token(&session)?;
        self.publish(AuthState::SignedIn {
            session,
            user: user.clone(),
        });
        Ok(user)
    }

    pub async fn sign_up(&self, password: &str, profile: &NewUser) -> Result<User, AuthError> {
        let (session, user) = self.gateway.sign_up(password, profile).await?;
        self.save_token(&session)?;
        self.publish(AuthState::SignedIn {
            session,
            user: user.clone(),
        });
        Ok(user)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let current = self.state();
        if let AuthState::SignedIn { session, .. } = &current {
            self.gateway.sign_out(session).await?;
        }
        self.forget_token()?;
        self.publish(AuthState::SignedOut);
        Ok(())
    }

    /// Closes the change stream. A persisted session stays valid for the next run.
    pub fn teardown(self) {
        drop(self.state);
    }

    fn publish(&self, state: AuthState) {
        self.state.send_replace(state);
    }

    fn read_token(&self) -> Result<Option<Session>, AuthError> {
        let Some(path) = &self.token_file else {
            return Ok(None);
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::SessionFile(err.to_string())),
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    fn save_token(&self, session: &Session) -> Result<(), AuthError> {
        let Some(path) = &self.token_file else {
            return Ok(());
        };
        let body =
            serde_json::to_string(session).map_err(|err| AuthError::SessionFile(err.to_string()))?;
        std::fs::write(path, body).map_err(|err| AuthError::SessionFile(err.to_string()))
    }

    fn forget_token(&self) -> Result<(), AuthError> {
        let Some(path) = &self.token_file else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::SessionFile(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::models::Role;
    use crate::permissions::PermissionOverrides;

    #[derive(Default)]
    struct MemoryGateway {
        passwords: Mutex<HashMap<String, (Uuid, String)>>,
        profiles: Mutex<HashMap<Uuid, User>>,
        sessions: Mutex<HashMap<Uuid, Session>>,
    }

    impl MemoryGateway {
        fn with_account(email: &str, password: &str, role: Role) -> (Self, Uuid) {
            let gateway = MemoryGateway::default();
            let id = Uuid::new_v4();
            gateway
                .passwords
                .lock()
                .unwrap()
                .insert(email.to_string(), (id, password.to_string()));
            gateway.profiles.lock().unwrap().insert(id, user(id, email, role));
            (gateway, id)
        }
    }

    fn user(id: Uuid, email: &str, role: Role) -> User {
        User {
            id,
            first_name: "Sophie".to_string(),
            last_name: "Lefèvre".to_string(),
            email: email.to_string(),
            role,
            custom_role: None,
            overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
            last_login: None,
        }
    }

    impl AuthGateway for MemoryGateway {
        async fn sign_in(&self, email: &str, password: &str) -> Result<(Session, User), AuthError> {
            let (id, stored) = self
                .passwords
                .lock()
                .unwrap()
                .get(email)
                .cloned()
                .ok_or(AuthError::InvalidCredentials)?;
            if stored != password {
                return Err(AuthError::InvalidCredentials);
            }
            let user = self.profile(id).await?;
            let session = Session {
                token: Uuid::new_v4(),
                account_id: id,
                email: email.to_string(),
            };
            self.sessions
                .lock()
                .unwrap()
                .insert(session.token, session.clone());
            Ok((session, user))
        }

        async fn sign_up(
            &self,
            password: &str,
            profile: &NewUser,
        ) -> Result<(Session, User), AuthError> {
            let id = Uuid::new_v4();
            {
                let mut passwords = self.passwords.lock().unwrap();
                if passwords.contains_key(&profile.email) {
                    return Err(AuthError::AlreadyRegistered(profile.email.clone()));
                }
                passwords.insert(profile.email.clone(), (id, password.to_string()));
            }
            let mut created = user(id, &profile.email, profile.role);
            created.overrides = profile.overrides;
            self.profiles.lock().unwrap().insert(id, created);
            self.sign_in(&profile.email, password).await
        }

        async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
            self.sessions.lock().unwrap().remove(&session.token);
            Ok(())
        }

        async fn current_session(&self, token: Uuid) -> Result<Option<Session>, AuthError> {
            Ok(self.sessions.lock().unwrap().get(&token).cloned())
        }

        async fn profile(&self, account_id: Uuid) -> Result<User, AuthError> {
            self.profiles
                .lock()
                .unwrap()
                .get(&account_id)
                .cloned()
                .ok_or(AuthError::MissingProfile(account_id))
        }
    }

    #[tokio::test]
    async fn sign_in_publishes_state_to_observers() {
        let (gateway, id) = MemoryGateway::with_account("cpe@college.fr", "secret", Role::Educator);
        let store = SessionStore::new(gateway, None);
        let mut changes = store.subscribe();
        assert_eq!(*changes.borrow(), AuthState::SignedOut);

        let user = store.sign_in("cpe@college.fr", "secret").await.unwrap();
        assert_eq!(user.id, id);
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow().user().map(|u| u.id), Some(id));

        store.sign_out().await.unwrap();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn wrong_password_leaves_state_unchanged() {
        let (gateway, _) = MemoryGateway::with_account("cpe@college.fr", "secret", Role::Educator);
        let store = SessionStore::new(gateway, None);
        let err = store.sign_in("cpe@college.fr", "nope").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(matches!(store.current_user(), Err(AuthError::NotSignedIn)));
    }

    #[tokio::test]
    async fn init_restores_a_persisted_session() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("session.json");
        let (gateway, id) = MemoryGateway::with_account("prof@college.fr", "pw", Role::Teacher);

        let first = SessionStore::new(gateway, Some(token_file.clone()));
        first.sign_in("prof@college.fr", "pw").await.unwrap();
        let SessionStore { gateway, .. } = first;

        let second = SessionStore::new(gateway, Some(token_file));
        let state = second.init().await.unwrap();
        assert_eq!(state.user().map(|u| u.id), Some(id));
        assert_eq!(second.current_user().unwrap().role, Role::Teacher);
    }

    #[tokio::test]
    async fn missing_profile_degrades_to_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("session.json");
        let (gateway, id) = MemoryGateway::with_account("x@college.fr", "pw", Role::Other);
        let store = SessionStore::new(gateway, Some(token_file));
        store.sign_in("x@college.fr", "pw").await.unwrap();

        store.gateway().profiles.lock().unwrap().remove(&id);
        let state = store.init().await.unwrap();
        assert_eq!(state, AuthState::SignedOut);
        assert!(store.current_user().is_err());
    }

    #[tokio::test]
    async fn sign_up_signs_the_new_user_in() {
        let store = SessionStore::new(MemoryGateway::default(), None);
        let profile = NewUser {
            first_name: "Marc".to_string(),
            last_name: "Henry".to_string(),
            email: "marc.henry@college.fr".to_string(),
            role: Role::Principal,
            custom_role: None,
            overrides: PermissionOverrides::default(),
        };
        let user = store.sign_up("pw", &profile).await.unwrap();
        assert!(user.permissions().sanction);
        assert_eq!(store.current_user().unwrap().email, "marc.henry@college.fr");

        let again = store.sign_up("pw", &profile).await.unwrap_err();
        assert!(matches!(again, AuthError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn teardown_closes_the_change_stream() {
        let store = SessionStore::new(MemoryGateway::default(), None);
        let mut changes = store.subscribe();
        store.teardown();
        assert!(changes.changed().await.is_err());
    }
}
