//! Resolver policy for headless deployments.
//!
//! A desktop shell embeds its own resolver UI and supplies it when
//! constructing the [`SessionRegistry`](crate::sessions::SessionRegistry).
//! Running the server standalone, ambiguous raises follow a fixed policy
//! instead of a user prompt.

use async_trait::async_trait;
use tracing::{debug, warn};

use fdc3_broker::collaborators::{CollaboratorError, Resolver, ResolverOutcome};
use fdc3_core::context::Context;
use fdc3_core::directory::ResolverCandidate;

/// What to do with an ambiguous raise when no resolver UI is attached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Treat every escalation as a user dismissal.
    #[default]
    Cancel,
    /// Auto-pick the first candidate (running instances sort ahead of
    /// directory entries). Useful for demos and integration tests.
    First,
}

/// Policy-driven [`Resolver`] for servers without a resolver UI.
pub struct HeadlessResolver {
    policy: ResolvePolicy,
}

impl HeadlessResolver {
    #[must_use]
    pub fn new(policy: ResolvePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Resolver for HeadlessResolver {
    async fn resolve(
        &self,
        intent: &str,
        _context: &Context,
        candidates: Vec<ResolverCandidate>,
    ) -> Result<ResolverOutcome, CollaboratorError> {
        match self.policy {
            ResolvePolicy::Cancel => {
                warn!(intent, candidates = candidates.len(), "no resolver UI attached, cancelling ambiguous raise");
                Ok(ResolverOutcome::Cancelled)
            }
            ResolvePolicy::First => match candidates.into_iter().next() {
                Some(first) => {
                    debug!(intent, app = first.app_id, "auto-resolved to first candidate");
                    Ok(ResolverOutcome::Chosen(first))
                }
                None => Ok(ResolverOutcome::Cancelled),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(app_id: &str) -> ResolverCandidate {
        ResolverCandidate {
            app_id: app_id.into(),
            title: app_id.into(),
            icon: None,
            instance_id: None,
            channel_id: None,
        }
    }

    #[tokio::test]
    async fn cancel_policy_dismisses() {
        let resolver = HeadlessResolver::new(ResolvePolicy::Cancel);
        let outcome = resolver
            .resolve(
                "ViewChart",
                &Context::new("fdc3.instrument", json!({})),
                vec![candidate("a"), candidate("b")],
            )
            .await
            .unwrap();
        assert_eq!(outcome, ResolverOutcome::Cancelled);
    }

    #[tokio::test]
    async fn first_policy_picks_the_head() {
        let resolver = HeadlessResolver::new(ResolvePolicy::First);
        let outcome = resolver
            .resolve(
                "ViewChart",
                &Context::new("fdc3.instrument", json!({})),
                vec![candidate("a"), candidate("b")],
            )
            .await
            .unwrap();
        assert_eq!(outcome, ResolverOutcome::Chosen(candidate("a")));
    }
}
