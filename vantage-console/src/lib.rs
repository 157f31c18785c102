//! Policy configuration core for the Vantage admin console.
//!
//! Two components do the real work: [`reconciler::ToggleReconciler`]
//! keeps a local mirror of the control plane's feature map and writes
//! toggles optimistically with rollback, and
//! [`approvals::ApprovalEngine`] drives the second-administrator
//! workflow for privileged changes. Both talk to the control plane only
//! through the [`remote::ControlPlane`] trait.

pub mod approvals;
pub mod config;
pub mod error;
pub mod features;
pub mod reconciler;
pub mod remote;
pub mod session;

pub use approvals::{ApprovalEngine, ApprovalTicket, PollHandle, ResolveAction, DISRUPTION_WARNING};
pub use config::Config;
pub use error::{ConsoleError, Outcome, Severity};
pub use features::FeatureSet;
pub use reconciler::{ToggleOutcome, ToggleReconciler};
pub use remote::{ControlPlane, MockControlPlane};
pub use vantage_api::SiteList;
pub use session::{AdminCredential, Session};
