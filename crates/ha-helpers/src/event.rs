//! Time-based callback tracking
//!
//! Mirrors the host helpers integrations use to schedule work:
//! `track_time_change` fires on every wall-clock second matching a pattern,
//! `track_point_in_time` fires once. Both return an [`Unsubscribe`] handle
//! that must be cancelled when the owning entity goes away; dropping the
//! handle leaves the tracker running.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Timelike, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::clock::Clock;

/// Callback run by a tracker; receives the scheduled fire time
pub type Action = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as an [`Action`]
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |when| f(when).boxed())
}

/// Upper bound on search steps in [`TimePattern::next_fire`]
const MAX_SEARCH_STEPS: usize = 10_000;

/// Wall-clock pattern for `track_time_change`
///
/// Each field lists the accepted values; `None` accepts any value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimePattern {
    pub hour: Option<Vec<u32>>,
    pub minute: Option<Vec<u32>>,
    pub second: Option<Vec<u32>>,
}

impl TimePattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hours(mut self, hours: impl Into<Vec<u32>>) -> Self {
        self.hour = Some(hours.into());
        self
    }

    pub fn minutes(mut self, minutes: impl Into<Vec<u32>>) -> Self {
        self.minute = Some(minutes.into());
        self
    }

    pub fn seconds(mut self, seconds: impl Into<Vec<u32>>) -> Self {
        self.second = Some(seconds.into());
        self
    }

    /// Whether some wall-clock time can match this pattern at all
    pub fn is_satisfiable(&self) -> bool {
        fn ok(field: &Option<Vec<u32>>, max: u32) -> bool {
            field
                .as_ref()
                .map_or(true, |values| values.iter().any(|v| *v <= max))
        }
        ok(&self.hour, 23) && ok(&self.minute, 59) && ok(&self.second, 59)
    }

    /// Whether the given local time matches
    pub fn matches(&self, local: &impl Timelike) -> bool {
        accepts(&self.hour, local.hour())
            && accepts(&self.minute, local.minute())
            && accepts(&self.second, local.second())
    }

    /// First whole second strictly after `after` whose wall-clock fields in
    /// `tz` match, or `None` if the pattern can never match
    pub fn next_fire(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        if !self.is_satisfiable() {
            return None;
        }

        let mut candidate = after.trunc_subsecs(0) + Duration::seconds(1);
        for _ in 0..MAX_SEARCH_STEPS {
            let local = candidate.with_timezone(&tz);
            let (minute, second) = (i64::from(local.minute()), i64::from(local.second()));

            if !accepts(&self.hour, local.hour()) {
                candidate += Duration::seconds(3600 - minute * 60 - second);
            } else if !accepts(&self.minute, local.minute()) {
                candidate += Duration::seconds(60 - second);
            } else if !accepts(&self.second, local.second()) {
                candidate += Duration::seconds(1);
            } else {
                return Some(candidate);
            }
        }
        None
    }
}

fn accepts(field: &Option<Vec<u32>>, value: u32) -> bool {
    field.as_ref().map_or(true, |values| values.contains(&value))
}

/// Handle cancelling a tracker
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    token: CancellationToken,
}

impl Unsubscribe {
    /// Stop the tracker; a callback that is already running finishes
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl From<CancellationToken> for Unsubscribe {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}

/// Schedules tracker tasks on the tokio runtime
///
/// Cloned trackers share the clock, the time zone and the shutdown token.
#[derive(Clone)]
pub struct TimeTracker {
    clock: Arc<dyn Clock>,
    time_zone: Tz,
    shutdown: CancellationToken,
}

impl TimeTracker {
    pub fn new(clock: Arc<dyn Clock>, time_zone: Tz) -> Self {
        Self {
            clock,
            time_zone,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time according to the tracker's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Time zone wall-clock patterns are evaluated in
    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    /// Run `action` once at `when` (right away if `when` has passed)
    pub fn track_point_in_time(&self, when: DateTime<Utc>, action: Action) -> Unsubscribe {
        let token = self.shutdown.child_token();
        let task_token = token.clone();
        let clock = self.clock.clone();

        tokio::spawn(async move {
            let delay = (when - clock.now()).to_std().unwrap_or_default();
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    trace!(%when, "Point-in-time tracker cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    action(when).await;
                }
            }
        });

        Unsubscribe { token }
    }

    /// Run `action` at every wall-clock second matching `pattern`
    pub fn track_time_change(&self, pattern: TimePattern, action: Action) -> Unsubscribe {
        let token = self.shutdown.child_token();
        let task_token = token.clone();
        let clock = self.clock.clone();
        let tz = self.time_zone;

        tokio::spawn(async move {
            let mut cursor = clock.now();
            loop {
                let base = cursor.max(clock.now());
                let Some(next) = pattern.next_fire(base, tz) else {
                    warn!(?pattern, "Time pattern never matches, tracker stopped");
                    break;
                };
                let delay = (next - base).to_std().unwrap_or_default();

                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                action(next).await;
                cursor = next;
            }
            trace!(?pattern, "Time change tracker finished");
        });

        Unsubscribe { token }
    }

    /// Cancel every tracker created through this tracker or its clones
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
