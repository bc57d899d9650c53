use crate::config::SecurityConfig;
use crate::db::models::security_event_models::{
    NewSecurityEvent, SecurityAction, SecurityEvent, SecurityEventQuery, Severity,
};
use crate::db::models::session_models::Session;
use crate::db::models::user_models::{
    CreateUserRequest, LoginCredentials, SessionGrant, UpdateUserRequest, User, UserChanges,
    UserCounts, UserRole, UserStatus,
};
use crate::db::repositories::security_events::SecurityEventsRepository;
use crate::db::repositories::sessions::SessionsRepository;
use crate::db::repositories::users::UsersRepository;
use crate::error::Error;
use crate::security::{generate_session_token, password, validation, ClientContext};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of one login attempt.
///
/// `Locked` and `Rejected` are reported to the caller identically; they only
/// differ in logs and security events.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(SessionGrant),
    Locked,
    Rejected,
}

/// Authentication service: logins, sessions, user administration and the security log
pub struct AuthService {
    users_repo: UsersRepository,
    sessions_repo: SessionsRepository,
    events_repo: SecurityEventsRepository,
    config: SecurityConfig,
    /// Verified against when the username is unknown
    dummy_hash: String,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(pool: Arc<SqlitePool>, config: &SecurityConfig) -> Result<Self> {
        let dummy_hash = password::hash_password(&password::generate_random_password(24), config)?;

        Ok(Self {
            users_repo: UsersRepository::new(Arc::clone(&pool)),
            sessions_repo: SessionsRepository::new(Arc::clone(&pool)),
            events_repo: SecurityEventsRepository::new(pool),
            config: config.clone(),
            dummy_hash,
        })
    }

    async fn verify(&self, plain: &str, hash: &str) -> Result<bool> {
        let (plain, hash) = (plain.to_string(), hash.to_string());
        tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
            .await
            .map_err(|e| Error::Internal(format!("Password verification task failed: {}", e)))?
    }

    async fn hash(&self, plain: &str) -> Result<String> {
        let plain = plain.to_string();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || password::hash_password(&plain, &config))
            .await
            .map_err(|e| Error::Internal(format!("Password hashing task failed: {}", e)))?
    }

    /// Append a security event and mirror it to the log
    pub async fn record_event(&self, event: NewSecurityEvent) -> Result<SecurityEvent> {
        match event.severity {
            Severity::Info => info!(
                "Security event {} (user: {:?}, ip: {:?})",
                event.action, event.user_id, event.ip_address
            ),
            Severity::Warning => warn!(
                "Security event {} (user: {:?}, ip: {:?}): {}",
                event.action, event.user_id, event.ip_address, event.details
            ),
            Severity::Error | Severity::Critical => error!(
                "Security event {} (user: {:?}, ip: {:?}): {}",
                event.action, event.user_id, event.ip_address, event.details
            ),
        }

        self.events_repo.append(&event).await
    }

    /// Record an event where the caller has no way to report a storage failure
    pub async fn record_event_best_effort(&self, event: NewSecurityEvent) {
        let action = event.action;
        if let Err(e) = self.record_event(event).await {
            error!("Failed to record security event {}: {}", action, e);
        }
    }

    /// Run one login attempt through the lockout state machine
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
        client: &ClientContext,
    ) -> Result<LoginOutcome> {
        let now = crate::db::now();
        let username = credentials.username.trim().to_lowercase();
        let user = self.users_repo.get_by_username(&username).await?;

        // always pay for one bcrypt comparison
        let stored_hash = user
            .as_ref()
            .map_or(self.dummy_hash.as_str(), |u| u.password_hash.as_str());
        let password_matches = self.verify(&credentials.password, stored_hash).await?;

        let user = match user {
            Some(user) => user,
            None => {
                self.record_event(
                    event(SecurityAction::LoginFailed, Severity::Warning, client)
                        .details(json!({ "username": username, "reason": "unknown_user" })),
                )
                .await?;
                return Ok(LoginOutcome::Rejected);
            }
        };

        if user.is_locked(now) {
            return self.blocked(&user, user.locked_until, client).await;
        }

        if !password_matches || !user.is_active() {
            return self.reject(&user, password_matches, now, client).await;
        }

        if !self.users_repo.record_successful_login(&user.id, now).await? {
            // locked by a concurrent attempt since the row was read
            return self.blocked_after_race(&user, client).await;
        }

        let session = self
            .sessions_repo
            .create(&Session {
                id: generate_session_token(),
                user_id: user.id,
                expires_at: now + Duration::hours(self.config.session_ttl_hours),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                created_at: now,
            })
            .await?;

        self.record_event(
            event(SecurityAction::LoginSuccess, Severity::Info, client)
                .user(Some(user.id))
                .details(json!({ "username": user.username })),
        )
        .await?;

        info!("User logged in: {}", user.username);

        Ok(LoginOutcome::Authenticated(SessionGrant {
            session_token: session.id,
            token_type: "Bearer".to_string(),
            expires_at: session.expires_at,
            user: User {
                failed_login_attempts: 0,
                locked_until: None,
                last_login: Some(now),
                ..user
            },
        }))
    }

    async fn reject(
        &self,
        user: &User,
        password_matches: bool,
        now: DateTime<Utc>,
        client: &ClientContext,
    ) -> Result<LoginOutcome> {
        let reason = if password_matches {
            "account_inactive"
        } else {
            "invalid_password"
        };
        let lock_until = now + Duration::minutes(self.config.lockout_minutes);

        let state = match self
            .users_repo
            .record_failed_login(&user.id, now, self.config.max_failed_attempts, lock_until)
            .await?
        {
            Some(state) => state,
            None => return self.blocked_after_race(user, client).await,
        };

        self.record_event(
            event(SecurityAction::LoginFailed, Severity::Warning, client)
                .user(Some(user.id))
                .details(json!({
                    "username": user.username,
                    "reason": reason,
                    "attempts": state.failed_login_attempts,
                })),
        )
        .await?;

        let locked = state.locked_until.map_or(false, |until| until > now);
        if !locked {
            return Ok(LoginOutcome::Rejected);
        }

        self.record_event(
            event(SecurityAction::AccountLocked, Severity::Error, client)
                .user(Some(user.id))
                .details(json!({
                    "username": user.username,
                    "attempts": state.failed_login_attempts,
                    "locked_until": state.locked_until,
                })),
        )
        .await?;

        Ok(LoginOutcome::Locked)
    }

    /// Refuse an attempt on a locked account without counting it
    async fn blocked(
        &self,
        user: &User,
        locked_until: Option<DateTime<Utc>>,
        client: &ClientContext,
    ) -> Result<LoginOutcome> {
        self.record_event(
            event(SecurityAction::LoginBlockedLocked, Severity::Warning, client)
                .user(Some(user.id))
                .details(json!({
                    "username": user.username,
                    "locked_until": locked_until,
                })),
        )
        .await?;

        Ok(LoginOutcome::Locked)
    }

    async fn blocked_after_race(&self, user: &User, client: &ClientContext) -> Result<LoginOutcome> {
        let locked_until = self
            .users_repo
            .get_by_id(&user.id)
            .await?
            .and_then(|stored| stored.locked_until);
        self.blocked(user, locked_until, client).await
    }

    /// Resolve a bearer token to its active owner
    pub async fn validate_session(&self, token: &str, now: DateTime<Utc>) -> Result<User> {
        let user = self
            .sessions_repo
            .find_active_user(token, now)
            .await?
            .ok_or_else(|| Error::Authentication("Invalid or expired session".to_string()))?;

        Ok(user)
    }

    /// End a session
    pub async fn logout(&self, token: &str, user: &User, client: &ClientContext) -> Result<()> {
        self.sessions_repo.delete(token).await?;

        self.record_event(
            event(SecurityAction::Logout, Severity::Info, client)
                .user(Some(user.id))
                .details(json!({ "username": user.username })),
        )
        .await?;

        info!("User logged out: {}", user.username);

        Ok(())
    }

    /// Remove sessions that have run out
    pub async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        self.sessions_repo.delete_expired(now).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.users_repo.get_all().await
    }

    pub async fn get_user(&self, id: &Uuid) -> Result<User> {
        let user = self
            .users_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User not found: {}", id)))?;

        Ok(user)
    }

    pub async fn user_counts(&self) -> Result<UserCounts> {
        self.users_repo.counts().await
    }

    pub async fn list_events(&self, query: &SecurityEventQuery) -> Result<Vec<SecurityEvent>> {
        self.events_repo.list(query).await
    }

    /// Create a user (admin function)
    pub async fn create_user(
        &self,
        actor: &User,
        request: &CreateUserRequest,
        client: &ClientContext,
    ) -> Result<User> {
        let username = validation::validate_username(&request.username)?;
        let email = validation::validate_email(request.email.as_deref())?;
        validation::validate_password(&request.password)?;
        let role = match &request.role {
            Some(role) => validation::parse_role(role)?,
            None => UserRole::User,
        };
        let status = match &request.status {
            Some(status) => validation::parse_status(status)?,
            None => UserStatus::Active,
        };

        let now = crate::db::now();
        let user = User {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash: self.hash(&request.password).await?,
            role,
            status,
            failed_login_attempts: 0,
            locked_until: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.users_repo.create(&user).await?;

        self.record_event(
            event(SecurityAction::UserCreated, Severity::Info, client)
                .user(Some(actor.id))
                .details(json!({
                    "target_user": created.id,
                    "username": created.username,
                    "role": created.role,
                })),
        )
        .await?;

        Ok(created)
    }

    /// Change email, role or status (admin function)
    pub async fn update_user(
        &self,
        actor: &User,
        id: &Uuid,
        request: &UpdateUserRequest,
        client: &ClientContext,
    ) -> Result<User> {
        let changes = UserChanges {
            email: validation::validate_email(request.email.as_deref())?,
            role: request.role.as_deref().map(validation::parse_role).transpose()?,
            status: request
                .status
                .as_deref()
                .map(validation::parse_status)
                .transpose()?,
        };
        if changes.is_empty() {
            return Err(Error::Validation("No changes supplied".to_string()).into());
        }

        let updated = match self.users_repo.update_profile(id, &changes).await {
            Ok(user) => user,
            Err(e) => {
                if let Some(Error::Constraint(reason)) = e.downcast_ref::<Error>() {
                    self.record_event(
                        event(SecurityAction::UserUpdateFailed, Severity::Warning, client)
                            .user(Some(actor.id))
                            .details(json!({
                                "target_user": id,
                                "fields": changes.field_names(),
                                "reason": reason,
                            })),
                    )
                    .await?;
                }
                return Err(e);
            }
        };

        if !updated.is_active() {
            self.sessions_repo.delete_for_user(&updated.id).await?;
        }

        self.record_event(
            event(SecurityAction::UserUpdated, Severity::Info, client)
                .user(Some(actor.id))
                .details(json!({
                    "target_user": updated.id,
                    "username": updated.username,
                    "fields": changes.field_names(),
                })),
        )
        .await?;

        Ok(updated)
    }

    /// Delete a user (admin function); refuses self-deletion and the last active admin
    pub async fn delete_user(&self, actor: &User, id: &Uuid, client: &ClientContext) -> Result<()> {
        if actor.id == *id {
            self.record_event(
                event(SecurityAction::UserDeletionBlocked, Severity::Warning, client)
                    .user(Some(actor.id))
                    .details(json!({ "target_user": id, "reason": "self_deletion" })),
            )
            .await?;
            return Err(Error::Constraint("You cannot delete your own account".to_string()).into());
        }

        let target = self.get_user(id).await?;

        if let Err(e) = self.users_repo.delete(id).await {
            if let Some(Error::Constraint(_)) = e.downcast_ref::<Error>() {
                self.record_event(
                    event(SecurityAction::UserDeletionBlocked, Severity::Warning, client)
                        .user(Some(actor.id))
                        .details(json!({
                            "target_user": id,
                            "username": target.username,
                            "reason": "last_admin",
                        })),
                )
                .await?;
            }
            return Err(e);
        }

        self.record_event(
            event(SecurityAction::UserDeleted, Severity::Warning, client)
                .user(Some(actor.id))
                .details(json!({ "target_user": id, "username": target.username })),
        )
        .await?;

        info!("User {} deleted by {}", target.username, actor.username);

        Ok(())
    }

    /// Change the caller's own password
    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
        client: &ClientContext,
    ) -> Result<()> {
        let stored = self.get_user(&user.id).await?;

        if !self.verify(current_password, &stored.password_hash).await? {
            warn!("Password change with wrong current password for {}", stored.username);
            return Err(Error::Validation("Current password is incorrect".to_string()).into());
        }
        validation::validate_password(new_password)?;
        if current_password == new_password {
            return Err(Error::Validation(
                "New password must differ from the current one".to_string(),
            )
            .into());
        }

        let password_hash = self.hash(new_password).await?;
        self.users_repo.update_password(&stored.id, &password_hash).await?;

        self.record_event(
            event(SecurityAction::PasswordChanged, Severity::Info, client)
                .user(Some(stored.id))
                .details(json!({ "username": stored.username })),
        )
        .await?;

        info!("Password changed for user: {}", stored.username);

        Ok(())
    }

    /// Reset a user's password to a random one (admin function); returns the new password
    pub async fn reset_password(
        &self,
        actor: &User,
        user_id: &Uuid,
        client: &ClientContext,
    ) -> Result<String> {
        let target = self.get_user(user_id).await?;

        let new_password = password::generate_random_password(16);
        let password_hash = self.hash(&new_password).await?;
        self.users_repo.update_password(&target.id, &password_hash).await?;
        self.sessions_repo.delete_for_user(&target.id).await?;

        self.record_event(
            event(SecurityAction::PasswordReset, Severity::Warning, client)
                .user(Some(actor.id))
                .details(json!({ "target_user": target.id, "username": target.username })),
        )
        .await?;

        info!("Password reset for user: {}", target.username);

        Ok(new_password)
    }
}

fn event(action: SecurityAction, severity: Severity, client: &ClientContext) -> NewSecurityEvent {
    NewSecurityEvent::new(action, severity)
        .client(client.ip_address.clone(), client.user_agent.clone())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{shared_test_pool, test_pool};

    pub(crate) fn test_config() -> SecurityConfig {
        SecurityConfig {
            password_hash_cost: 4,
            ..SecurityConfig::default()
        }
    }

    pub(crate) async fn seed_user(
        pool: &Arc<SqlitePool>,
        username: &str,
        plain: &str,
        role: UserRole,
    ) -> User {
        let now = crate::db::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: None,
            password_hash: bcrypt::hash(plain, 4).unwrap(),
            role,
            status: UserStatus::Active,
            failed_login_attempts: 0,
            locked_until: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        UsersRepository::new(Arc::clone(pool)).create(&user).await.unwrap()
    }

    fn creds(username: &str, password: &str) -> LoginCredentials {
        LoginCredentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    async fn count(auth: &AuthService, action: SecurityAction) -> usize {
        auth.list_events(&SecurityEventQuery {
            action: Some(action),
            ..SecurityEventQuery::default()
        })
        .await
        .unwrap()
        .len()
    }

    fn constraint(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Error>(), Some(Error::Constraint(_)))
    }

    #[tokio::test]
    async fn correct_login_issues_session_and_one_success_event() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "alice", "Tunnel-2024", UserRole::User).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();
        let client = ClientContext::default();

        let outcome = auth.login(&creds("Alice", "Tunnel-2024"), &client).await.unwrap();
        let grant = match outcome {
            LoginOutcome::Authenticated(grant) => grant,
            other => panic!("expected success, got {:?}", other),
        };

        assert_eq!(grant.session_token.len(), 64);
        assert_eq!(grant.user.failed_login_attempts, 0);
        assert_eq!(count(&auth, SecurityAction::LoginSuccess).await, 1);

        let now = crate::db::now();
        assert_eq!(auth.validate_session(&grant.session_token, now).await.unwrap().id, user.id);
        assert!(grant.expires_at > now + Duration::hours(23));

        auth.logout(&grant.session_token, &user, &client).await.unwrap();
        assert!(auth.validate_session(&grant.session_token, now).await.is_err());
        assert_eq!(count(&auth, SecurityAction::Logout).await, 1);
    }

    #[tokio::test]
    async fn five_failures_lock_and_sixth_is_blocked_without_counting() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "bob", "Tunnel-2024", UserRole::User).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();
        let client = ClientContext::default();

        for _ in 0..4 {
            let outcome = auth.login(&creds("bob", "wrong"), &client).await.unwrap();
            assert!(matches!(outcome, LoginOutcome::Rejected));
        }
        let fifth = auth.login(&creds("bob", "wrong"), &client).await.unwrap();
        assert!(matches!(fifth, LoginOutcome::Locked));
        assert_eq!(count(&auth, SecurityAction::AccountLocked).await, 1);

        // even the right password is refused while locked
        let sixth = auth.login(&creds("bob", "Tunnel-2024"), &client).await.unwrap();
        assert!(matches!(sixth, LoginOutcome::Locked));

        let stored = auth.get_user(&user.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 5);
        assert!(stored.is_locked(crate::db::now()));
        assert_eq!(count(&auth, SecurityAction::LoginFailed).await, 5);
        assert_eq!(count(&auth, SecurityAction::LoginBlockedLocked).await, 1);
    }

    #[tokio::test]
    async fn expired_lock_restarts_the_count() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "carol", "Tunnel-2024", UserRole::User).await;
        let users = UsersRepository::new(pool.clone());
        let past = crate::db::now() - Duration::minutes(1);
        for _ in 0..5 {
            users
                .record_failed_login(&user.id, crate::db::now(), 5, past)
                .await
                .unwrap();
        }

        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();
        let client = ClientContext::default();

        let outcome = auth.login(&creds("carol", "wrong"), &client).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::Rejected));
        let stored = auth.get_user(&user.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 1);
        assert!(stored.locked_until.is_none());

        let outcome = auth.login(&creds("carol", "Tunnel-2024"), &client).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
        assert_eq!(auth.get_user(&user.id).await.unwrap().failed_login_attempts, 0);
    }

    #[tokio::test]
    async fn unknown_user_and_inactive_account_are_rejected() {
        let pool = test_pool().await;
        let admin = seed_user(&pool, "root-admin", "Tunnel-2024", UserRole::Admin).await;
        let dormant = seed_user(&pool, "dormant", "Tunnel-2024", UserRole::User).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();
        let client = ClientContext::default();

        auth.update_user(
            &admin,
            &dormant.id,
            &UpdateUserRequest {
                status: Some("inactive".to_string()),
                ..UpdateUserRequest::default()
            },
            &client,
        )
        .await
        .unwrap();

        let ghost = auth.login(&creds("nobody", "Tunnel-2024"), &client).await.unwrap();
        assert!(matches!(ghost, LoginOutcome::Rejected));

        let inactive = auth.login(&creds("dormant", "Tunnel-2024"), &client).await.unwrap();
        assert!(matches!(inactive, LoginOutcome::Rejected));
        assert_eq!(auth.get_user(&dormant.id).await.unwrap().failed_login_attempts, 1);

        let anonymous = auth
            .list_events(&SecurityEventQuery {
                action: Some(SecurityAction::LoginFailed),
                ..SecurityEventQuery::default()
            })
            .await
            .unwrap();
        assert!(anonymous.iter().any(|e| e.user_id.is_none()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_keep_independent_counters() {
        let pool = shared_test_pool(8).await;
        let dan = seed_user(&pool, "dan", "Tunnel-2024", UserRole::User).await;
        let eve = seed_user(&pool, "eve", "Tunnel-2024", UserRole::User).await;
        let auth = Arc::new(AuthService::new(pool.clone(), &test_config()).unwrap());

        let attempts = [("dan", "x"), ("eve", "x"), ("dan", "y")];
        let handles: Vec<_> = attempts
            .iter()
            .map(|&(username, password)| {
                let auth = Arc::clone(&auth);
                let credentials = creds(username, password);
                tokio::spawn(async move {
                    let outcome = auth.login(&credentials, &ClientContext::default()).await;
                    outcome
                })
            })
            .collect();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(matches!(outcome, LoginOutcome::Rejected));
        }

        assert_eq!(auth.get_user(&dan.id).await.unwrap().failed_login_attempts, 2);
        assert_eq!(auth.get_user(&eve.id).await.unwrap().failed_login_attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_lock_once_and_stop_counting() {
        let pool = shared_test_pool(8).await;
        let mallory = seed_user(&pool, "mallory", "Tunnel-2024", UserRole::User).await;
        let users = UsersRepository::new(pool.clone());
        let far = crate::db::now() + Duration::hours(1);
        for _ in 0..4 {
            users
                .record_failed_login(&mallory.id, crate::db::now(), 5, far)
                .await
                .unwrap();
        }
        let auth = Arc::new(AuthService::new(pool.clone(), &test_config()).unwrap());

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let auth = Arc::clone(&auth);
                let credentials = creds("mallory", "wrong");
                tokio::spawn(async move {
                    let outcome = auth.login(&credentials, &ClientContext::default()).await;
                    outcome
                })
            })
            .collect();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(matches!(outcome, LoginOutcome::Locked));
        }

        let stored = auth.get_user(&mallory.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 5);
        assert!(stored.is_locked(crate::db::now()));
        assert_eq!(count(&auth, SecurityAction::AccountLocked).await, 1);
        assert_eq!(count(&auth, SecurityAction::LoginFailed).await, 1);
        assert_eq!(count(&auth, SecurityAction::LoginBlockedLocked).await, 5);
    }

    #[tokio::test]
    async fn expired_sessions_fail_validation_and_are_swept() {
        let pool = test_pool().await;
        seed_user(&pool, "frank", "Tunnel-2024", UserRole::User).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();

        let grant = match auth
            .login(&creds("frank", "Tunnel-2024"), &ClientContext::default())
            .await
            .unwrap()
        {
            LoginOutcome::Authenticated(grant) => grant,
            other => panic!("expected success, got {:?}", other),
        };

        let later = grant.expires_at + Duration::seconds(1);
        let err = auth.validate_session(&grant.session_token, later).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Authentication(_))));

        assert_eq!(auth.sweep_expired_sessions(later).await.unwrap(), 1);
        assert_eq!(auth.sweep_expired_sessions(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn admin_cannot_delete_self_or_last_admin() {
        let pool = test_pool().await;
        let admin = seed_user(&pool, "boss", "Tunnel-2024", UserRole::Admin).await;
        let moderator = seed_user(&pool, "mod", "Tunnel-2024", UserRole::Moderator).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();
        let client = ClientContext::default();

        let err = auth.delete_user(&admin, &admin.id, &client).await.unwrap_err();
        assert!(constraint(&err));
        assert_eq!(count(&auth, SecurityAction::UserDeletionBlocked).await, 1);

        // a second admin acting on the sole active admin still hits the invariant
        let mut acting = moderator.clone();
        acting.role = UserRole::Admin;
        let err = auth.delete_user(&acting, &admin.id, &client).await.unwrap_err();
        assert!(constraint(&err));

        auth.delete_user(&admin, &moderator.id, &client).await.unwrap();
        assert_eq!(count(&auth, SecurityAction::UserDeleted).await, 1);
    }

    #[tokio::test]
    async fn create_user_validates_and_rejects_duplicates() {
        let pool = test_pool().await;
        let admin = seed_user(&pool, "boss", "Tunnel-2024", UserRole::Admin).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();
        let client = ClientContext::default();

        let request = CreateUserRequest {
            username: "Grace".to_string(),
            email: Some("grace@example.org".to_string()),
            password: "Tunnel-2024".to_string(),
            role: Some("moderator".to_string()),
            status: None,
        };
        let created = auth.create_user(&admin, &request, &client).await.unwrap();
        assert_eq!(created.username, "grace");
        assert_eq!(created.role, UserRole::Moderator);
        assert_eq!(created.status, UserStatus::Active);

        let err = auth.create_user(&admin, &request, &client).await.unwrap_err();
        assert!(constraint(&err));

        let weak = CreateUserRequest {
            username: "heidi".to_string(),
            password: "password".to_string(),
            ..request
        };
        let err = auth.create_user(&admin, &weak, &client).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Validation(_))));
    }

    #[tokio::test]
    async fn last_admin_demotion_is_recorded_and_refused() {
        let pool = test_pool().await;
        let admin = seed_user(&pool, "boss", "Tunnel-2024", UserRole::Admin).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();

        let err = auth
            .update_user(
                &admin,
                &admin.id,
                &UpdateUserRequest {
                    role: Some("user".to_string()),
                    ..UpdateUserRequest::default()
                },
                &ClientContext::default(),
            )
            .await
            .unwrap_err();
        assert!(constraint(&err));
        assert_eq!(count(&auth, SecurityAction::UserUpdateFailed).await, 1);
    }

    #[tokio::test]
    async fn password_change_and_reset() {
        let pool = test_pool().await;
        let admin = seed_user(&pool, "boss", "Tunnel-2024", UserRole::Admin).await;
        let ivan = seed_user(&pool, "ivan", "Tunnel-2024", UserRole::User).await;
        let auth = AuthService::new(pool.clone(), &test_config()).unwrap();
        let client = ClientContext::default();

        let err = auth
            .change_password(&ivan, "not-it", "Better-Pass-1", &client)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Validation(_))));

        auth.change_password(&ivan, "Tunnel-2024", "Better-Pass-1", &client)
            .await
            .unwrap();
        let outcome = auth.login(&creds("ivan", "Better-Pass-1"), &client).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));

        let fresh = auth.reset_password(&admin, &ivan.id, &client).await.unwrap();
        assert_eq!(fresh.len(), 16);
        let outcome = auth.login(&creds("ivan", &fresh), &client).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
        assert_eq!(count(&auth, SecurityAction::PasswordReset).await, 1);
    }
}
