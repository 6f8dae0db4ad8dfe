use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use shared_config::ClientConfig;
use shared_models::UserRole;

use crate::models::RemainingWait;

/// Minutes before the scheduled start from which host-role callers with
/// early access may join.
pub const EARLY_JOIN_WINDOW_MINUTES: i64 = 30;

/// Pure join-eligibility rules. Implementations never perform I/O and
/// never error; ineligibility is a value, not an exception.
pub trait EligibilityPolicy: Send + Sync {
    fn is_joinable(
        &self,
        scheduled_start: DateTime<Utc>,
        role: UserRole,
        early_join: bool,
        now: DateTime<Utc>,
    ) -> bool;

    /// Remaining wait until the applicable threshold; `None` once joinable.
    fn time_until_joinable(
        &self,
        scheduled_start: DateTime<Utc>,
        role: UserRole,
        early_join: bool,
        now: DateTime<Utc>,
    ) -> Option<RemainingWait>;
}

/// Production rules: hosts with early access may join from start − 30 min,
/// everyone else from the exact scheduled start. Early access requested by
/// a non-host is categorically ineligible, matching the behavior observed
/// in the field rather than falling back to on-time eligibility.
#[derive(Debug, Default, Clone)]
pub struct StandardEligibility;

impl StandardEligibility {
    fn threshold(
        scheduled_start: DateTime<Utc>,
        role: UserRole,
        early_join: bool,
    ) -> DateTime<Utc> {
        if early_join && role.is_host() {
            scheduled_start - chrono::Duration::minutes(EARLY_JOIN_WINDOW_MINUTES)
        } else {
            scheduled_start
        }
    }
}

impl EligibilityPolicy for StandardEligibility {
    fn is_joinable(
        &self,
        scheduled_start: DateTime<Utc>,
        role: UserRole,
        early_join: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if early_join && !role.is_host() {
            return false;
        }
        now >= Self::threshold(scheduled_start, role, early_join)
    }

    fn time_until_joinable(
        &self,
        scheduled_start: DateTime<Utc>,
        role: UserRole,
        early_join: bool,
        now: DateTime<Utc>,
    ) -> Option<RemainingWait> {
        let threshold = Self::threshold(scheduled_start, role, early_join);
        let wait = threshold - now;
        if wait <= chrono::Duration::zero() {
            return None;
        }

        // Round partial minutes up so the countdown never reads "0 min"
        // while joining is still blocked.
        let total_minutes = (wait.num_seconds() + 59) / 60;
        Some(RemainingWait {
            hours: total_minutes / 60,
            minutes: total_minutes % 60,
        })
    }
}

/// Always-eligible policy for development and tests. Selected at
/// construction time; release builds never read the enabling flag.
#[derive(Debug, Default, Clone)]
pub struct PermissiveEligibility;

impl EligibilityPolicy for PermissiveEligibility {
    fn is_joinable(&self, _: DateTime<Utc>, _: UserRole, _: bool, _: DateTime<Utc>) -> bool {
        true
    }

    fn time_until_joinable(
        &self,
        _: DateTime<Utc>,
        _: UserRole,
        _: bool,
        _: DateTime<Utc>,
    ) -> Option<RemainingWait> {
        None
    }
}

pub fn policy_from_config(config: &ClientConfig) -> Arc<dyn EligibilityPolicy> {
    if config.permissive_eligibility {
        Arc::new(PermissiveEligibility)
    } else {
        Arc::new(StandardEligibility)
    }
}

/// Combines the appointment's date and start time into the scheduled
/// start instant.
pub fn scheduled_start(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}
