//! Optimistic toggle reconciliation against the control plane.
//!
//! The reconciler owns the local mirror of the remote feature map. Every
//! write is optimistic: the mirror is updated first, the batch is pushed,
//! and on any failure the touched keys are restored to their exact prior
//! values before the error is returned. The mirror therefore never holds
//! a state the control plane refused.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{ConsoleError, Outcome};
use crate::features::{self, FeatureSet};
use crate::remote::ControlPlane;

/// What a successful toggle did: the requested change plus any writes
/// derived from the exclusivity table, or a deferral to the approval
/// workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Applied {
        feature: String,
        enabled: bool,
        /// Partner features forced off in the same batch.
        also_disabled: Vec<String>,
    },
    /// The change needs a second administrator; nothing was written.
    Deferred { feature: String },
}

impl ToggleOutcome {
    pub fn to_outcome(&self) -> Outcome {
        match self {
            ToggleOutcome::Applied {
                feature,
                enabled,
                also_disabled,
            } => {
                let state = if *enabled { "enabled" } else { "disabled" };
                let mut message = format!("'{feature}' successfully {state}.");
                for partner in also_disabled {
                    message.push_str(&format!(" '{partner}' was disabled."));
                }
                Outcome::success(message)
            }
            ToggleOutcome::Deferred { feature } => Outcome::warning(format!(
                "'{feature}' requires administrator approval before it takes effect; \
                 waiting for a pending request to be approved."
            )),
        }
    }
}

pub struct ToggleReconciler {
    api: Arc<dyn ControlPlane>,
    features: RwLock<FeatureSet>,
}

impl ToggleReconciler {
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        ToggleReconciler {
            api,
            features: RwLock::new(FeatureSet::new()),
        }
    }

    /// Replace the mirror with the control plane's current state, then
    /// repair any exclusivity violations found in it. Repairs are local
    /// only; the control plane converges on the next write. Returns a
    /// warning outcome per repaired feature.
    pub async fn hydrate(&self) -> Result<Vec<Outcome>, ConsoleError> {
        let mut fetched = self.api.fetch_features().await?;
        let repaired = features::repair_exclusivity(&mut fetched);
        let count = fetched.len();
        *self.features.write().await = fetched;
        info!(features = count, "feature mirror hydrated");

        Ok(repaired
            .into_iter()
            .map(|name| {
                warn!(feature = %name, "exclusive pair conflict in remote state, disabled locally");
                Outcome::warning(format!(
                    "'{name}' conflicted with its paired feature and was disabled"
                ))
            })
            .collect())
    }

    /// A point-in-time copy of the mirror.
    pub async fn snapshot(&self) -> FeatureSet {
        self.features.read().await.clone()
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.features
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// Set one feature to a desired state. Unknown names fail validation
    /// before anything is touched; approval-gated enables are deferred;
    /// everything else goes through the optimistic write path. Requests
    /// that match the current state still round-trip to the control
    /// plane so connectivity problems surface.
    pub async fn set_feature(
        &self,
        name: &str,
        desired: bool,
    ) -> Result<ToggleOutcome, ConsoleError> {
        if !features::is_known(name) {
            return Err(ConsoleError::unknown_feature(name));
        }
        if features::requires_approval(name, desired) {
            info!(feature = name, "enable deferred to approval workflow");
            return Ok(ToggleOutcome::Deferred {
                feature: name.to_string(),
            });
        }
        self.write_feature(name, desired).await
    }

    /// The ungated write path. Used directly by the approval engine to
    /// commit a change that has been approved.
    pub(crate) async fn write_feature(
        &self,
        name: &str,
        desired: bool,
    ) -> Result<ToggleOutcome, ConsoleError> {
        let updates = {
            let current = self.features.read().await;
            features::derived_updates(&current, name, desired)
        };
        self.apply_with_rollback(&updates).await?;

        let also_disabled = updates
            .keys()
            .filter(|key| key.as_str() != name)
            .cloned()
            .collect();
        info!(feature = name, enabled = desired, "toggle applied");
        Ok(ToggleOutcome::Applied {
            feature: name.to_string(),
            enabled: desired,
            also_disabled,
        })
    }

    /// Apply `updates` to the mirror, push them, and restore the exact
    /// prior values of every touched key if the push fails for any
    /// reason. Keys absent before the write are removed again.
    async fn apply_with_rollback(
        &self,
        updates: &BTreeMap<String, bool>,
    ) -> Result<(), ConsoleError> {
        let saved: Vec<(String, Option<bool>)> = {
            let mut guard = self.features.write().await;
            let saved = updates
                .keys()
                .map(|key| (key.clone(), guard.get(key).copied()))
                .collect();
            for (key, value) in updates {
                guard.insert(key.clone(), *value);
            }
            saved
        };

        match self.api.apply_toggles(updates).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("toggle batch failed, rolling back {} keys: {err}", saved.len());
                let mut guard = self.features.write().await;
                for (key, previous) in saved {
                    match previous {
                        Some(value) => {
                            guard.insert(key, value);
                        }
                        None => {
                            guard.remove(&key);
                        }
                    }
                }
                Err(err)
            }
        }
    }
}
