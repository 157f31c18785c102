//! The seam between the console core and the control plane.
//!
//! [`ControlPlane`] is the only way the reconciler and approval engine
//! talk to the outside world. The live implementation wraps
//! [`vantage_api::ConsoleApi`]; [`MockControlPlane`] backs `--dry-run`
//! with an in-memory control plane that applies every change locally.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::approvals::{ApprovalTicket, ResolveAction};
use crate::error::ConsoleError;
use crate::features::{self, FeatureSet};
use crate::session::{AdminCredential, AdminIdentity, AuthGrant, AuthToken, SystemIdentity};
use vantage_api::SiteList;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the authoritative feature map.
    async fn fetch_features(&self) -> Result<FeatureSet, ConsoleError>;

    /// Apply a batch of toggles. `Err(Conflict)` means the control plane
    /// answered and refused; `Err(Transport)` means it may not have seen
    /// the request at all.
    async fn apply_toggles(&self, updates: &BTreeMap<String, bool>) -> Result<(), ConsoleError>;

    /// Exchange administrator credentials for a bearer token.
    async fn authenticate(&self, credential: &AdminCredential) -> Result<AuthGrant, ConsoleError>;

    /// List tickets awaiting an administrator decision.
    async fn pending_approvals(&self) -> Result<Vec<ApprovalTicket>, ConsoleError>;

    /// Approve or deny one ticket on behalf of the authenticated admin.
    async fn resolve_approval(
        &self,
        token: &AuthToken,
        ticket_id: &str,
        action: ResolveAction,
    ) -> Result<(), ConsoleError>;

    async fn system_identity(&self) -> Result<SystemIdentity, ConsoleError>;

    /// Read one of the site lists behind the browsing restrictions.
    async fn site_list(&self, list: SiteList) -> Result<Vec<String>, ConsoleError>;

    /// Add to a site list, returning the updated list.
    async fn add_site(&self, list: SiteList, site: &str) -> Result<Vec<String>, ConsoleError>;

    /// Remove from a site list, returning the updated list.
    async fn remove_site(&self, list: SiteList, site: &str) -> Result<Vec<String>, ConsoleError>;

    async fn ping(&self) -> Result<(), ConsoleError>;
}

/// Parse the control plane's ticket timestamp, falling back to the time
/// of receipt when the string is unparseable. Queue ordering degrades
/// but the ticket is never dropped.
fn parse_ticket_timestamp(id: &str, raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(err) => {
            warn!(ticket = id, timestamp = raw, "unparseable ticket timestamp: {err}");
            Utc::now()
        }
    }
}

#[async_trait]
impl ControlPlane for vantage_api::ConsoleApi {
    async fn fetch_features(&self) -> Result<FeatureSet, ConsoleError> {
        Ok(self.get_config().await?)
    }

    async fn apply_toggles(&self, updates: &BTreeMap<String, bool>) -> Result<(), ConsoleError> {
        Ok(vantage_api::ConsoleApi::apply_toggles(self, updates).await?)
    }

    async fn authenticate(&self, credential: &AdminCredential) -> Result<AuthGrant, ConsoleError> {
        let response = self
            .login(&credential.username, &credential.password)
            .await
            .map_err(|err| match err {
                vantage_api::Error::Rejected(message) => ConsoleError::Auth(message),
                other => other.into(),
            })?;
        let identity = response.user.map(|user| AdminIdentity {
            username: user.username.unwrap_or_else(|| credential.username.clone()),
            email: user.email,
            signed_in_at: Utc::now(),
        });
        Ok(AuthGrant {
            token: AuthToken::new(response.token),
            identity,
        })
    }

    async fn pending_approvals(&self) -> Result<Vec<ApprovalTicket>, ConsoleError> {
        let pending = self.pending_vpn_requests().await?;
        Ok(pending
            .into_iter()
            .map(|request| {
                let timestamp = parse_ticket_timestamp(&request.id, &request.timestamp);
                ApprovalTicket {
                    id: request.id,
                    message: request.message,
                    timestamp,
                }
            })
            .collect())
    }

    async fn resolve_approval(
        &self,
        token: &AuthToken,
        ticket_id: &str,
        action: ResolveAction,
    ) -> Result<(), ConsoleError> {
        match action {
            ResolveAction::Approve => {
                Ok(self.approve_vpn_request(token.secret(), ticket_id).await?)
            }
            ResolveAction::Deny => Ok(self.deny_vpn_request(token.secret(), ticket_id).await?),
        }
    }

    async fn system_identity(&self) -> Result<SystemIdentity, ConsoleError> {
        let info = self.system_info().await?;
        let activation_key = self.activation_key().await?;
        Ok(SystemIdentity {
            system_id: info.system_id,
            activation_key,
        })
    }

    async fn site_list(&self, list: SiteList) -> Result<Vec<String>, ConsoleError> {
        Ok(self.sites(list).await?)
    }

    async fn add_site(&self, list: SiteList, site: &str) -> Result<Vec<String>, ConsoleError> {
        Ok(vantage_api::ConsoleApi::add_site(self, list, site).await?)
    }

    async fn remove_site(&self, list: SiteList, site: &str) -> Result<Vec<String>, ConsoleError> {
        Ok(vantage_api::ConsoleApi::remove_site(self, list, site).await?)
    }

    async fn ping(&self) -> Result<(), ConsoleError> {
        Ok(vantage_api::ConsoleApi::ping(self).await?)
    }
}

/// In-memory control plane for `--dry-run`. Writes are applied to local
/// state and logged, never sent anywhere.
pub struct MockControlPlane {
    features: RwLock<FeatureSet>,
    tickets: RwLock<Vec<ApprovalTicket>>,
    sites: RwLock<(Vec<String>, Vec<String>)>,
    activation_key: Option<String>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        let tickets = vec![ApprovalTicket {
            id: uuid::Uuid::new_v4().to_string(),
            message: "VPN client detected on DEMO-ENDPOINT".to_string(),
            timestamp: Utc::now(),
        }];
        MockControlPlane {
            features: RwLock::new(features::default_feature_set()),
            tickets: RwLock::new(tickets),
            sites: RwLock::new((Vec::new(), Vec::new())),
            activation_key: Some("DRY-RUN-ACTIVATION".to_string()),
        }
    }

    pub fn unactivated() -> Self {
        MockControlPlane {
            features: RwLock::new(features::default_feature_set()),
            tickets: RwLock::new(Vec::new()),
            sites: RwLock::new((Vec::new(), Vec::new())),
            activation_key: None,
        }
    }

    fn pick(sites: &(Vec<String>, Vec<String>), list: SiteList) -> &Vec<String> {
        match list {
            SiteList::Whitelist => &sites.0,
            SiteList::Blocklist => &sites.1,
        }
    }

    fn pick_mut(sites: &mut (Vec<String>, Vec<String>), list: SiteList) -> &mut Vec<String> {
        match list {
            SiteList::Whitelist => &mut sites.0,
            SiteList::Blocklist => &mut sites.1,
        }
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn fetch_features(&self) -> Result<FeatureSet, ConsoleError> {
        Ok(self.features.read().await.clone())
    }

    async fn apply_toggles(&self, updates: &BTreeMap<String, bool>) -> Result<(), ConsoleError> {
        let mut features = self.features.write().await;
        for (name, enabled) in updates {
            info!("DRY-RUN: would set '{name}' to {enabled}");
            features.insert(name.clone(), *enabled);
        }
        Ok(())
    }

    async fn authenticate(&self, credential: &AdminCredential) -> Result<AuthGrant, ConsoleError> {
        info!("DRY-RUN: would authenticate '{}'", credential.username);
        Ok(AuthGrant {
            token: AuthToken::new(format!("dry-run-{}", uuid::Uuid::new_v4())),
            identity: Some(AdminIdentity {
                username: credential.username.clone(),
                email: None,
                signed_in_at: Utc::now(),
            }),
        })
    }

    async fn pending_approvals(&self) -> Result<Vec<ApprovalTicket>, ConsoleError> {
        Ok(self.tickets.read().await.clone())
    }

    async fn resolve_approval(
        &self,
        _token: &AuthToken,
        ticket_id: &str,
        action: ResolveAction,
    ) -> Result<(), ConsoleError> {
        info!("DRY-RUN: would {action} ticket {ticket_id}");
        let mut tickets = self.tickets.write().await;
        let before = tickets.len();
        tickets.retain(|ticket| ticket.id != ticket_id);
        if tickets.len() == before {
            return Err(ConsoleError::Conflict(format!(
                "no pending request with id {ticket_id}"
            )));
        }
        Ok(())
    }

    async fn system_identity(&self) -> Result<SystemIdentity, ConsoleError> {
        Ok(SystemIdentity {
            system_id: "DRY-RUN-SYSTEM".to_string(),
            activation_key: self.activation_key.clone(),
        })
    }

    async fn site_list(&self, list: SiteList) -> Result<Vec<String>, ConsoleError> {
        Ok(Self::pick(&*self.sites.read().await, list).clone())
    }

    async fn add_site(&self, list: SiteList, site: &str) -> Result<Vec<String>, ConsoleError> {
        info!("DRY-RUN: would add '{site}' to the {list}");
        let mut sites = self.sites.write().await;
        let entries = Self::pick_mut(&mut sites, list);
        if !entries.iter().any(|entry| entry == site) {
            entries.push(site.to_string());
        }
        Ok(entries.clone())
    }

    async fn remove_site(&self, list: SiteList, site: &str) -> Result<Vec<String>, ConsoleError> {
        info!("DRY-RUN: would remove '{site}' from the {list}");
        let mut sites = self.sites.write().await;
        let entries = Self::pick_mut(&mut sites, list);
        entries.retain(|entry| entry != site);
        Ok(entries.clone())
    }

    async fn ping(&self) -> Result<(), ConsoleError> {
        Ok(())
    }
}
