//! Session context: which managed system the console is attached to and
//! which administrator, if any, is signed in.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::ConsoleError;
use crate::remote::ControlPlane;

/// Username and password pair used to resolve an approval or to sign in.
/// Held only for the duration of the call that consumes it.
#[derive(Clone)]
pub struct AdminCredential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Short-lived bearer token returned by the control plane.
#[derive(Clone)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        AuthToken(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub username: String,
    pub email: Option<String>,
    pub signed_in_at: DateTime<Utc>,
}

/// Token plus whatever identity the control plane reported with it.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub token: AuthToken,
    pub identity: Option<AdminIdentity>,
}

/// Identity of the managed system as reported by the control plane.
#[derive(Debug, Clone)]
pub struct SystemIdentity {
    pub system_id: String,
    pub activation_key: Option<String>,
}

/// Everything context-shaped that operations previously had to dig out
/// of ambient state: the managed system, its activation, and the signed
/// in administrator.
#[derive(Debug)]
pub struct Session {
    pub system: SystemIdentity,
    admin: Option<AdminIdentity>,
}

impl Session {
    /// Fetch the system identity and activation key from the control
    /// plane and build an unauthenticated session around them.
    pub async fn establish(api: &dyn ControlPlane) -> Result<Self, ConsoleError> {
        let system = api.system_identity().await?;
        info!(system_id = %system.system_id, activated = system.activation_key.is_some(), "session established");
        Ok(Session {
            system,
            admin: None,
        })
    }

    pub fn is_activated(&self) -> bool {
        self.system.activation_key.is_some()
    }

    /// Policy operations require an activated system.
    pub fn require_activation(&self) -> Result<(), ConsoleError> {
        if self.is_activated() {
            Ok(())
        } else {
            Err(ConsoleError::Validation(
                "this system is not activated; policy configuration is unavailable".to_string(),
            ))
        }
    }

    /// Sign an administrator in. The credential is consumed; only the
    /// reported identity is retained.
    pub async fn login(
        &mut self,
        api: &dyn ControlPlane,
        credential: AdminCredential,
    ) -> Result<&AdminIdentity, ConsoleError> {
        let username = credential.username.clone();
        let grant = api.authenticate(&credential).await?;
        let identity = grant.identity.unwrap_or(AdminIdentity {
            username,
            email: None,
            signed_in_at: Utc::now(),
        });
        info!(admin = %identity.username, "administrator signed in");
        Ok(self.admin.insert(identity))
    }

    pub fn logout(&mut self) {
        if let Some(admin) = self.admin.take() {
            info!(admin = %admin.username, "administrator signed out");
        }
    }

    pub fn admin(&self) -> Option<&AdminIdentity> {
        self.admin.as_ref()
    }
}
