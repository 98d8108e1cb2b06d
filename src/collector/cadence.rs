use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

/// Shortest interval a rule may use.
///
/// The dispatcher ticks about once per second; anything finer would
/// be silently rounded up by the tick period anyway.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// A job bound to a cadence entry.
///
/// The callable only *launches* work (see [`super::executor`]); an
/// `Err` means the launch itself failed and is reported to the
/// dispatcher.
pub type Job = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

// ------------------------------------------------------------
// Trigger rules
// ------------------------------------------------------------

/// Trigger rule of one cadence entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Fixed interval between firings.
    ///
    /// next-due = last firing + interval, never less than
    /// [`MIN_INTERVAL`] even when the variant is built directly
    Every(Duration),

    /// Once per calendar day at a wall-clock time.
    ///
    /// next-due = next occurrence of the time strictly after the
    /// last firing
    DailyAt(NaiveTime),
}

impl Rule {
    /// Interval rule, clamped to [`MIN_INTERVAL`].
    pub fn every(interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            log::warn!(
                "interval {:?} is below the {:?} minimum, using the minimum",
                interval,
                MIN_INTERVAL
            );
            Self::Every(MIN_INTERVAL)
        } else {
            Self::Every(interval)
        }
    }

    pub fn seconds(n: u64) -> Self {
        Self::every(Duration::from_secs(n))
    }

    pub fn minutes(n: u64) -> Self {
        Self::every(Duration::from_secs(n.saturating_mul(60)))
    }

    pub fn hours(n: u64) -> Self {
        Self::every(Duration::from_secs(n.saturating_mul(3600)))
    }

    /// Daily rule from an `HH:MM` or `HH:MM:SS` string.
    pub fn daily_at(time: &str) -> anyhow::Result<Self> {
        let parsed = NaiveTime::parse_from_str(time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .with_context(|| format!("invalid time of day '{time}', expected HH:MM"))?;
        Ok(Self::DailyAt(parsed))
    }

    /// Next due time for a firing that happened at `last`.
    ///
    /// Always strictly greater than `last`.
    pub fn next_due(&self, last: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Every(interval) => {
                let step = TimeDelta::from_std((*interval).max(MIN_INTERVAL))
                    .unwrap_or(TimeDelta::MAX);
                last.checked_add_signed(step).unwrap_or(NaiveDateTime::MAX)
            }
            Self::DailyAt(at) => {
                let today = last.date().and_time(*at);
                if today > last {
                    today
                } else {
                    today
                        .checked_add_signed(TimeDelta::days(1))
                        .unwrap_or(NaiveDateTime::MAX)
                }
            }
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(d) => write!(f, "every {:?}", d),
            Self::DailyAt(t) => write!(f, "daily at {}", t.format("%H:%M:%S")),
        }
    }
}

// ------------------------------------------------------------
// Cadence table
// ------------------------------------------------------------

/// One (rule, job) pair and its due-time bookkeeping.
pub struct CadenceEntry {
    rule: Rule,
    job: Job,
    next_due: Option<NaiveDateTime>,
}

impl CadenceEntry {
    pub fn rule(&self) -> Rule {
        self.rule
    }

    /// `None` until the entry has been seen by `run_all` or `run_pending`.
    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.next_due
    }

    fn is_due(&self, now: NaiveDateTime) -> bool {
        self.next_due.is_some_and(|due| due <= now)
    }

    /// Reschedules from `now`, then invokes the job.
    ///
    /// Rescheduling first keeps next-due moving forward even when the
    /// job fails to launch.
    fn fire(&mut self, now: NaiveDateTime) -> anyhow::Result<()> {
        self.next_due = Some(self.rule.next_due(now));
        (self.job)()
    }
}

impl fmt::Debug for CadenceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CadenceEntry")
            .field("rule", &self.rule)
            .field("next_due", &self.next_due)
            .finish_non_exhaustive()
    }
}

/// The ordered set of trigger rules owned by one collector.
///
/// Each entry is evaluated independently. Built by a collector's
/// `scheduler()`:
///
/// ```ignore
/// CadenceTable::new()
///     .with(Rule::seconds(5), executor::detached(self))
/// ```
#[derive(Debug, Default)]
pub struct CadenceTable {
    entries: Vec<CadenceEntry>,
}

impl CadenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder style.
    pub fn with(mut self, rule: Rule, job: Job) -> Self {
        self.push(rule, job);
        self
    }

    pub fn push(&mut self, rule: Rule, job: Job) {
        self.entries.push(CadenceEntry {
            rule,
            job,
            next_due: None,
        });
    }

    pub fn entries(&self) -> &[CadenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fires every entry once, regardless of due time (startup catch-up).
    pub fn run_all_at(&mut self, now: NaiveDateTime) -> anyhow::Result<usize> {
        let fired = self.entries.len();
        let results: Vec<_> = self.entries.iter_mut().map(|e| e.fire(now)).collect();
        collect_failures(fired, results)
    }

    /// Fires the entries that are due as of `now`.
    ///
    /// Entries that were never scheduled get their first due time
    /// computed from `now` and do not fire.
    ///
    /// RETURNS:
    /// - Ok(n): n entries fired, all launched
    /// - Err: at least one due job failed; every due entry was still
    ///   attempted and rescheduled
    pub fn run_pending_at(&mut self, now: NaiveDateTime) -> anyhow::Result<usize> {
        let mut fired = 0;
        let mut results = Vec::new();

        for entry in &mut self.entries {
            if entry.next_due.is_none() {
                entry.next_due = Some(entry.rule.next_due(now));
                continue;
            }
            if entry.is_due(now) {
                fired += 1;
                results.push(entry.fire(now));
            }
        }

        collect_failures(fired, results)
    }

    /// Earliest next-due time across all entries.
    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.entries.iter().filter_map(|e| e.next_due).min()
    }
}

fn collect_failures(
    fired: usize,
    results: Vec<anyhow::Result<()>>,
) -> anyhow::Result<usize> {
    let mut errors = results.into_iter().filter_map(Result::err);

    match errors.next() {
        None => Ok(fired),
        Some(first) => {
            let failed = 1 + errors.count();
            Err(anyhow!("{failed} of {fired} jobs failed: {first:#}"))
        }
    }
}
