//! Approval workflow for privileged feature changes.
//!
//! Enabling VPN blocking needs a second administrator's sign-off. The
//! control plane queues a ticket per request; this engine keeps a local
//! copy of that queue fresh via periodic polling and drives the
//! authenticate-then-resolve flow. Poll responses are sequence-tagged so
//! a slow response from before a resolution can never resurrect a ticket
//! that was already decided.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Outcome};
use crate::features;
use crate::reconciler::{ToggleOutcome, ToggleReconciler};
use crate::remote::ControlPlane;
use crate::session::AdminCredential;

/// Shown to the operator before credentials are requested for an
/// approval. Approving takes effect immediately on the endpoint.
pub const DISRUPTION_WARNING: &str = "Approving enforces VPN blocking immediately. This requires \
     administrator privileges and will close all open browsers on the endpoint.";

/// A pending request for a privileged change, waiting on an
/// administrator decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalTicket {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    Approve,
    Deny,
}

impl std::fmt::Display for ResolveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveAction::Approve => f.write_str("approve"),
            ResolveAction::Deny => f.write_str("deny"),
        }
    }
}

/// What resolving a ticket did. `committed` carries the toggle that an
/// approval triggered; denials never touch feature state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub ticket_id: String,
    pub action: ResolveAction,
    pub committed: Option<ToggleOutcome>,
}

impl ResolveOutcome {
    pub fn to_outcome(&self) -> Outcome {
        match self.action {
            ResolveAction::Approve => Outcome::success(format!(
                "request {} approved; VPN blocking is now enforced",
                self.ticket_id
            )),
            ResolveAction::Deny => Outcome::success(format!(
                "request {} denied; no settings were changed",
                self.ticket_id
            )),
        }
    }
}

struct PendingQueue {
    tickets: Vec<ApprovalTicket>,
    /// Sequence number of the newest poll (or resolution) applied.
    last_applied: u64,
}

/// Cancellation handle for the background poll task. Dropping it stops
/// the task as well.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct ApprovalEngine {
    api: Arc<dyn ControlPlane>,
    reconciler: Arc<ToggleReconciler>,
    pending: Arc<RwLock<PendingQueue>>,
    poll_seq: Arc<AtomicU64>,
}

impl ApprovalEngine {
    pub fn new(api: Arc<dyn ControlPlane>, reconciler: Arc<ToggleReconciler>) -> Self {
        ApprovalEngine {
            api,
            reconciler,
            pending: Arc::new(RwLock::new(PendingQueue {
                tickets: Vec::new(),
                last_applied: 0,
            })),
            poll_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The local view of the queue, oldest ticket first.
    pub async fn pending(&self) -> Vec<ApprovalTicket> {
        self.pending.read().await.tickets.clone()
    }

    fn next_seq(&self) -> u64 {
        self.poll_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the queue with `tickets` if `seq` is newer than anything
    /// already applied. Stale responses are discarded wholesale.
    async fn apply_poll(
        pending: &RwLock<PendingQueue>,
        seq: u64,
        mut tickets: Vec<ApprovalTicket>,
    ) -> bool {
        let mut queue = pending.write().await;
        if seq <= queue.last_applied {
            debug!(seq, last_applied = queue.last_applied, "discarding stale poll response");
            return false;
        }
        tickets.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        queue.tickets = tickets;
        queue.last_applied = seq;
        true
    }

    /// Fetch the queue once, outside the polling cadence.
    pub async fn refresh(&self) -> Result<Vec<ApprovalTicket>, ConsoleError> {
        let seq = self.next_seq();
        let tickets = self.api.pending_approvals().await?;
        Self::apply_poll(&self.pending, seq, tickets).await;
        Ok(self.pending().await)
    }

    /// Start polling the control plane every `interval`. The returned
    /// handle stops the task on `stop()` or drop; polling failures are
    /// logged and the previous queue view is kept.
    pub fn start_polling(&self, interval: Duration) -> PollHandle {
        let api = self.api.clone();
        let pending = self.pending.clone();
        let poll_seq = self.poll_seq.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let seq = poll_seq.fetch_add(1, Ordering::SeqCst) + 1;
                match api.pending_approvals().await {
                    Ok(tickets) => {
                        Self::apply_poll(&pending, seq, tickets).await;
                    }
                    Err(err) => {
                        debug!("approval poll failed: {err}");
                    }
                }
            }
        });
        PollHandle { task }
    }

    /// Resolve one ticket: authenticate, tell the control plane, remove
    /// the ticket locally, and on approval commit the feature change.
    ///
    /// Failures before the resolution call leave everything untouched.
    /// A commit failure after a successful approval is surfaced to the
    /// caller; the decision itself has already been recorded and the
    /// feature can be retried through the normal toggle path.
    pub async fn resolve(
        &self,
        ticket_id: &str,
        action: ResolveAction,
        credential: AdminCredential,
    ) -> Result<ResolveOutcome, ConsoleError> {
        let grant = self.api.authenticate(&credential).await?;
        self.api
            .resolve_approval(&grant.token, ticket_id, action)
            .await?;

        // Eager removal. Claiming a sequence number here means any poll
        // issued before this point can no longer resurrect the ticket.
        let seq = self.next_seq();
        {
            let mut queue = self.pending.write().await;
            queue.tickets.retain(|ticket| ticket.id != ticket_id);
            queue.last_applied = seq;
        }
        info!(ticket = ticket_id, action = %action, "approval ticket resolved");

        let committed = match action {
            ResolveAction::Approve => {
                let outcome = self
                    .reconciler
                    .write_feature(features::VPN_BLOCKING, true)
                    .await
                    .map_err(|err| {
                        warn!("approved change could not be committed: {err}");
                        err
                    })?;
                Some(outcome)
            }
            ResolveAction::Deny => None,
        };

        Ok(ResolveOutcome {
            ticket_id: ticket_id.to_string(),
            action,
            committed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::features::FeatureSet;
    use crate::session::{AuthGrant, AuthToken, SystemIdentity};

    struct FakeControlPlane {
        features: RwLock<FeatureSet>,
        tickets: RwLock<Vec<ApprovalTicket>>,
        resolved: Mutex<Vec<(String, ResolveAction)>>,
        reject_credentials: bool,
        fail_resolution: Mutex<Option<ConsoleError>>,
        fail_toggle: Mutex<Option<ConsoleError>>,
    }

    impl FakeControlPlane {
        fn with_tickets(tickets: Vec<ApprovalTicket>) -> Self {
            FakeControlPlane {
                features: RwLock::new(features::default_feature_set()),
                tickets: RwLock::new(tickets),
                resolved: Mutex::new(Vec::new()),
                reject_credentials: false,
                fail_resolution: Mutex::new(None),
                fail_toggle: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn fetch_features(&self) -> Result<FeatureSet, ConsoleError> {
            Ok(self.features.read().await.clone())
        }

        async fn apply_toggles(
            &self,
            updates: &BTreeMap<String, bool>,
        ) -> Result<(), ConsoleError> {
            if let Some(err) = self.fail_toggle.lock().unwrap().take() {
                return Err(err);
            }
            let mut features = self.features.write().await;
            for (name, enabled) in updates {
                features.insert(name.clone(), *enabled);
            }
            Ok(())
        }

        async fn authenticate(
            &self,
            credential: &AdminCredential,
        ) -> Result<AuthGrant, ConsoleError> {
            if self.reject_credentials {
                return Err(ConsoleError::Auth("Invalid username or password".to_string()));
            }
            let _ = credential;
            Ok(AuthGrant {
                token: AuthToken::new("fake-token"),
                identity: None,
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
            if let Some(err) = self.fail_resolution.lock().unwrap().take() {
                return Err(err);
            }
            self.resolved
                .lock()
                .unwrap()
                .push((ticket_id.to_string(), action));
            self.tickets
                .write()
                .await
                .retain(|ticket| ticket.id != ticket_id);
            Ok(())
        }

        async fn system_identity(&self) -> Result<SystemIdentity, ConsoleError> {
            Ok(SystemIdentity {
                system_id: "TEST".to_string(),
                activation_key: Some("key".to_string()),
            })
        }

        async fn site_list(
            &self,
            _list: vantage_api::SiteList,
        ) -> Result<Vec<String>, ConsoleError> {
            Ok(Vec::new())
        }

        async fn add_site(
            &self,
            _list: vantage_api::SiteList,
            _site: &str,
        ) -> Result<Vec<String>, ConsoleError> {
            Ok(Vec::new())
        }

        async fn remove_site(
            &self,
            _list: vantage_api::SiteList,
            _site: &str,
        ) -> Result<Vec<String>, ConsoleError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), ConsoleError> {
            Ok(())
        }
    }

    fn ticket(id: &str, minutes_ago: i64) -> ApprovalTicket {
        ApprovalTicket {
            id: id.to_string(),
            message: format!("VPN client detected ({id})"),
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    fn credential() -> AdminCredential {
        AdminCredential {
            username: "ops".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn engine_with(
        fake: Arc<FakeControlPlane>,
    ) -> (Arc<ToggleReconciler>, ApprovalEngine) {
        let reconciler = Arc::new(ToggleReconciler::new(fake.clone()));
        let engine = ApprovalEngine::new(fake, reconciler.clone());
        (reconciler, engine)
    }

    #[tokio::test]
    async fn refresh_fills_the_queue_oldest_first() {
        let fake = Arc::new(FakeControlPlane::with_tickets(vec![
            ticket("req-new", 1),
            ticket("req-old", 30),
        ]));
        let (_, engine) = engine_with(fake);

        let pending = engine.refresh().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "req-old");
        assert_eq!(pending[1].id, "req-new");
    }

    #[tokio::test]
    async fn deny_removes_the_ticket_and_leaves_features_alone() {
        let fake = Arc::new(FakeControlPlane::with_tickets(vec![ticket("req-1", 5)]));
        let (reconciler, engine) = engine_with(fake.clone());
        reconciler.hydrate().await.unwrap();
        engine.refresh().await.unwrap();

        let outcome = engine
            .resolve("req-1", ResolveAction::Deny, credential())
            .await
            .unwrap();
        assert_eq!(outcome.action, ResolveAction::Deny);
        assert!(outcome.committed.is_none());
        assert!(engine.pending().await.is_empty());
        assert!(!reconciler.is_enabled(features::VPN_BLOCKING).await);
        assert_eq!(
            *fake.resolved.lock().unwrap(),
            vec![("req-1".to_string(), ResolveAction::Deny)]
        );
    }

    #[tokio::test]
    async fn approve_removes_the_ticket_and_commits_the_feature() {
        let fake = Arc::new(FakeControlPlane::with_tickets(vec![ticket("req-1", 5)]));
        let (reconciler, engine) = engine_with(fake.clone());
        reconciler.hydrate().await.unwrap();
        engine.refresh().await.unwrap();

        let outcome = engine
            .resolve("req-1", ResolveAction::Approve, credential())
            .await
            .unwrap();
        assert!(matches!(
            outcome.committed,
            Some(ToggleOutcome::Applied { ref feature, enabled: true, .. })
                if feature == features::VPN_BLOCKING
        ));
        assert!(engine.pending().await.is_empty());
        assert!(reconciler.is_enabled(features::VPN_BLOCKING).await);
        assert_eq!(
            fake.fetch_features().await.unwrap().get(features::VPN_BLOCKING),
            Some(&true)
        );
    }

    #[tokio::test]
    async fn rejected_credentials_leave_the_queue_untouched() {
        let mut fake = FakeControlPlane::with_tickets(vec![ticket("req-1", 5)]);
        fake.reject_credentials = true;
        let fake = Arc::new(fake);
        let (reconciler, engine) = engine_with(fake.clone());
        reconciler.hydrate().await.unwrap();
        engine.refresh().await.unwrap();

        let err = engine
            .resolve("req-1", ResolveAction::Approve, credential())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConsoleError::Auth(ref message) if message.as_str() == "Invalid username or password")
        );
        assert_eq!(engine.pending().await.len(), 1);
        assert!(fake.resolved.lock().unwrap().is_empty());
        assert!(!reconciler.is_enabled(features::VPN_BLOCKING).await);
    }

    #[tokio::test]
    async fn failed_resolution_keeps_the_ticket_pending() {
        let fake = Arc::new(FakeControlPlane::with_tickets(vec![ticket("req-1", 5)]));
        *fake.fail_resolution.lock().unwrap() =
            Some(ConsoleError::Conflict("request already handled".to_string()));
        let (reconciler, engine) = engine_with(fake.clone());
        reconciler.hydrate().await.unwrap();
        engine.refresh().await.unwrap();

        let err = engine
            .resolve("req-1", ResolveAction::Approve, credential())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Conflict(_)));
        assert_eq!(engine.pending().await.len(), 1);
        assert!(!reconciler.is_enabled(features::VPN_BLOCKING).await);
    }

    #[tokio::test]
    async fn commit_failure_after_approval_is_surfaced() {
        let fake = Arc::new(FakeControlPlane::with_tickets(vec![ticket("req-1", 5)]));
        *fake.fail_toggle.lock().unwrap() =
            Some(ConsoleError::Transport("unreachable".to_string()));
        let (reconciler, engine) = engine_with(fake.clone());
        reconciler.hydrate().await.unwrap();
        engine.refresh().await.unwrap();

        let err = engine
            .resolve("req-1", ResolveAction::Approve, credential())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Transport(_)));
        // the decision was recorded; only the commit failed
        assert!(engine.pending().await.is_empty());
        assert!(!reconciler.is_enabled(features::VPN_BLOCKING).await);
    }

    #[tokio::test]
    async fn stale_poll_responses_are_discarded() {
        let fake = Arc::new(FakeControlPlane::with_tickets(Vec::new()));
        let (_, engine) = engine_with(fake);

        let newer = vec![ticket("req-2", 1)];
        let older = vec![ticket("req-1", 10)];
        assert!(ApprovalEngine::apply_poll(&engine.pending, 2, newer).await);
        assert!(!ApprovalEngine::apply_poll(&engine.pending, 1, older).await);

        let pending = engine.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "req-2");
    }

    #[tokio::test]
    async fn in_flight_poll_cannot_resurrect_a_resolved_ticket() {
        let fake = Arc::new(FakeControlPlane::with_tickets(vec![ticket("req-1", 5)]));
        let (reconciler, engine) = engine_with(fake);
        reconciler.hydrate().await.unwrap();
        engine.refresh().await.unwrap();

        // a poll that started before the resolution below
        let stale_seq = engine.next_seq();
        let stale_view = vec![ticket("req-1", 5)];

        engine
            .resolve("req-1", ResolveAction::Deny, credential())
            .await
            .unwrap();
        assert!(engine.pending().await.is_empty());

        assert!(!ApprovalEngine::apply_poll(&engine.pending, stale_seq, stale_view).await);
        assert!(engine.pending().await.is_empty());
    }

    #[tokio::test]
    async fn polling_task_updates_the_queue_and_stops_on_demand() {
        let fake = Arc::new(FakeControlPlane::with_tickets(vec![ticket("req-1", 5)]));
        let (_, engine) = engine_with(fake);

        let handle = engine.start_polling(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.pending().await.len(), 1);

        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
    }
}
