use crate::error::{EngineError, EngineResult};
use crate::models::UserId;
use async_trait::async_trait;
use dashmap::DashSet;

/// Boolean premium check consulted before feedback learning and text queries.
#[async_trait]
pub trait EntitlementGate: Send + Sync {
    async fn is_entitled(&self, user_id: UserId) -> EngineResult<bool>;
}

/// Fails with [`EngineError::PremiumRequired`] unless the user is entitled.
pub async fn require_premium(
    gate: &dyn EntitlementGate,
    user_id: UserId,
    feature: &'static str,
) -> EngineResult<()> {
    if gate.is_entitled(user_id).await? {
        Ok(())
    } else {
        tracing::debug!(user_id = %user_id, feature, "premium feature denied");
        Err(EngineError::PremiumRequired(feature))
    }
}

/// Fixed entitlement set, used in development and tests.
#[derive(Debug, Default)]
pub struct StaticEntitlements {
    premium: DashSet<UserId>,
    allow_all: bool,
}

impl StaticEntitlements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_all() -> Self {
        Self {
            premium: DashSet::new(),
            allow_all: true,
        }
    }

    pub fn grant(&self, user_id: UserId) {
        self.premium.insert(user_id);
    }

    pub fn revoke(&self, user_id: UserId) {
        self.premium.remove(&user_id);
    }
}

#[async_trait]
impl EntitlementGate for StaticEntitlements {
    async fn is_entitled(&self, user_id: UserId) -> EngineResult<bool> {
        Ok(self.allow_all || self.premium.contains(&user_id))
    }
}
