//! Per-identity cooldowns between write actions.
//!
//! The ledger only ever grows on its own; [`spawn_purger`] keeps it bounded
//! by the set of identities active within the longest cooldown period.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{Clock, DomainError, Result, VoterIdentity};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::task::BackgroundTask;

pub const DEFAULT_PURGE_INTERVAL: StdDuration = StdDuration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownAction {
    CreateReport,
    Vote,
    Comment,
}

/// Minimum spacing between two actions of the same kind by one identity.
/// A zero duration disables the check for that action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub report: Duration,
    pub vote: Duration,
    pub comment: Duration,
}

impl CooldownPolicy {
    pub fn period(&self, action: CooldownAction) -> Duration {
        match action {
            CooldownAction::CreateReport => self.report,
            CooldownAction::Vote => self.vote,
            CooldownAction::Comment => self.comment,
        }
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            report: Duration::seconds(60),
            vote: Duration::seconds(1),
            comment: Duration::seconds(5),
        }
    }
}

pub struct Cooldowns {
    policy: CooldownPolicy,
    last: DashMap<(CooldownAction, VoterIdentity), DateTime<Utc>>,
}

impl Cooldowns {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            last: DashMap::new(),
        }
    }

    /// Records the attempt if allowed, otherwise fails with `RateLimited`.
    pub fn try_acquire(&self, action: CooldownAction, voter: &VoterIdentity, now: DateTime<Utc>) -> Result<()> {
        let period = self.policy.period(action);
        if period <= Duration::zero() {
            return Ok(());
        }

        match self.last.entry((action, voter.clone())) {
            Entry::Occupied(mut slot) => {
                let ready_at = *slot.get() + period;
                if now < ready_at {
                    let wait = ready_at - now;
                    // round up so "retry in 0s" is never reported
                    let secs = (wait.num_milliseconds() + 999) / 1000;
                    return Err(DomainError::RateLimited {
                        retry_after_secs: secs.max(1) as u64,
                    });
                }
                slot.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }

    /// Drops entries whose cooldown has fully elapsed and returns how many
    /// went.
    pub fn purge(&self, now: DateTime<Utc>) -> usize {
        let longest = [self.policy.report, self.policy.vote, self.policy.comment]
            .into_iter()
            .max()
            .unwrap_or_else(Duration::zero);
        let before = self.last.len();
        self.last.retain(|_, at| *at + longest > now);
        before.saturating_sub(self.last.len())
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self::new(CooldownPolicy::default())
    }
}

/// Purges `cooldowns` every `every` until the returned task is shut down.
pub fn spawn_purger(cooldowns: Arc<Cooldowns>, clock: Arc<dyn Clock>, every: StdDuration) -> BackgroundTask {
    BackgroundTask::spawn("cooldown-purge", move |mut stop| async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    let removed = cooldowns.purge(clock.now());
                    if removed > 0 {
                        debug!(removed, remaining = cooldowns.len(), "cooldown entries purged");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use domains::testing::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_second_attempt_inside_window_is_rejected() {
        let cooldowns = Cooldowns::default();
        let voter = VoterIdentity::new("fp", "ip");

        cooldowns.try_acquire(CooldownAction::Comment, &voter, t0()).unwrap();
        let err = cooldowns
            .try_acquire(CooldownAction::Comment, &voter, t0() + Duration::milliseconds(1500))
            .unwrap_err();
        assert_eq!(err, DomainError::RateLimited { retry_after_secs: 4 });

        cooldowns
            .try_acquire(CooldownAction::Comment, &voter, t0() + Duration::seconds(5))
            .unwrap();
    }

    #[test]
    fn test_actions_and_identities_are_independent() {
        let cooldowns = Cooldowns::default();
        let alice = VoterIdentity::new("a", "1");
        let bob = VoterIdentity::new("b", "2");

        cooldowns.try_acquire(CooldownAction::CreateReport, &alice, t0()).unwrap();
        cooldowns.try_acquire(CooldownAction::Vote, &alice, t0()).unwrap();
        cooldowns.try_acquire(CooldownAction::CreateReport, &bob, t0()).unwrap();
        assert_eq!(cooldowns.len(), 3);
    }

    #[test]
    fn test_zero_period_disables() {
        let cooldowns = Cooldowns::new(CooldownPolicy {
            report: Duration::zero(),
            vote: Duration::zero(),
            comment: Duration::zero(),
        });
        let voter = VoterIdentity::new("fp", "ip");
        for _ in 0..3 {
            cooldowns.try_acquire(CooldownAction::Vote, &voter, t0()).unwrap();
        }
        assert!(cooldowns.is_empty());
    }

    #[test]
    fn test_purge_keeps_running_cooldowns() {
        let cooldowns = Cooldowns::default();
        cooldowns
            .try_acquire(CooldownAction::Vote, &VoterIdentity::new("a", "1"), t0())
            .unwrap();
        cooldowns
            .try_acquire(CooldownAction::Vote, &VoterIdentity::new("b", "2"), t0() + Duration::seconds(30))
            .unwrap();
        assert_eq!(cooldowns.purge(t0() + Duration::seconds(61)), 1);
        assert_eq!(cooldowns.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purger_drains_elapsed_entries_until_stopped() {
        let clock = Arc::new(ManualClock::at_epoch());
        let cooldowns = Arc::new(Cooldowns::default());
        let task = spawn_purger(cooldowns.clone(), clock.clone(), StdDuration::from_secs(30));

        cooldowns
            .try_acquire(CooldownAction::CreateReport, &VoterIdentity::new("a", "1"), clock.now())
            .unwrap();
        tokio::time::sleep(StdDuration::from_secs(31)).await;
        assert_eq!(cooldowns.len(), 1, "cooldown still running");

        clock.advance(Duration::seconds(61));
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert!(cooldowns.is_empty());

        task.shutdown().await;
        cooldowns
            .try_acquire(CooldownAction::CreateReport, &VoterIdentity::new("b", "2"), clock.now())
            .unwrap();
        clock.advance(Duration::seconds(61));
        tokio::time::sleep(StdDuration::from_secs(90)).await;
        assert_eq!(cooldowns.len(), 1);
    }
}
