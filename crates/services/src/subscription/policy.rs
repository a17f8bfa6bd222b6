//! Entitlement decision for a single content item.

use super::ports::{PlanType, PlanView, SubscriptionStatus};

/// Decide whether a (reconciled) plan grants access to a content item.
///
/// Rules, first match wins:
/// 1. no subscription, or status other than active: deny
/// 2. free plan: deny
/// 3. basic plan on a premium item: deny
/// 4. otherwise allow
pub fn can_access(plan: Option<&PlanView>, requires_premium: bool) -> bool {
    let Some(plan) = plan else {
        return false;
    };
    if plan.status != SubscriptionStatus::Active {
        return false;
    }
    match plan.plan_type {
        PlanType::Free => false,
        PlanType::Basic => !requires_premium,
        PlanType::Premium => true,
    }
}
