use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::time::MissedTickBehavior;

use crate::{
    collector::{
        cadence::CadenceTable,
        clock::{Clock, SystemClock},
    },
    metrics::METRICS,
    plugins::contract::Collector,
};

/// Default dispatcher tick period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Cadence table of one collector, kept for the main loop.
struct Scheduled {
    name: String,
    table: CadenceTable,
}

/// Drives the cadence tables of all active collectors.
///
/// This type is responsible for:
/// - Wiring one cadence table per active collector
/// - Running an immediate catch-up pass at startup
/// - Evaluating every table once per tick, forever
///
/// DESIGN:
/// - One sequential loop, no locks held across collectors
/// - Tables are evaluated in registration order
/// - Firing only launches jobs (see `executor::detached`), so a slow
///   collector never holds up the loop
/// - Failures are isolated per collector: an error or a panic while
///   evaluating one table is logged and the loop moves on
///
/// This type does NOT:
/// - Track running jobs
/// - Prevent overlapping runs of the same job
/// - Back off from failing collectors
///
pub struct Dispatcher {
    scheduled: Vec<Scheduled>,
    tick: Duration,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(tick: Duration) -> Self {
        Self {
            scheduled: Vec::new(),
            tick,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of collectors with a retained cadence table.
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Wires and catches up every active collector.
    ///
    /// For each active collector:
    /// 1. Build its cadence table
    /// 2. Fire every entry once (catch-up)
    /// 3. Keep the table for the main loop
    ///
    /// A failing catch-up is logged; the table is still kept. A
    /// collector whose `scheduler()` panics is logged and skipped.
    pub fn register(&mut self, collectors: &[Arc<dyn Collector>]) {
        for collector in collectors {
            let name = collector.name().to_string();
            if !collector.active() {
                log::info!("plugin {} is inactive, not scheduled", name);
                continue;
            }

            let table = match catch_unwind(AssertUnwindSafe(|| Arc::clone(collector).scheduler())) {
                Ok(table) => table,
                Err(payload) => {
                    METRICS.catch_up_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "plugin {} panicked while building its schedule: {}",
                        name,
                        panic_message(payload.as_ref())
                    );
                    continue;
                }
            };

            log::info!(
                "running plugin {}/{}, publishing to {}",
                name,
                collector.version(),
                collector.topic()
            );
            if table.is_empty() {
                log::warn!("plugin {} declares no cadence entries", name);
            }
            for entry in table.entries() {
                log::debug!("  {} runs {}", name, entry.rule());
            }

            let mut scheduled = Scheduled { name, table };
            let now = self.clock.now();
            if let Err(e) = evaluate(&mut scheduled.table, |t| t.run_all_at(now)) {
                METRICS.catch_up_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("catch-up of plugin {} failed: {:#}", scheduled.name, e);
            }
            if let Some(next) = scheduled.table.next_run() {
                log::debug!("  {} next run at {}", scheduled.name, next);
            }

            self.scheduled.push(scheduled);
            METRICS.collectors_scheduled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Evaluates every retained table once. Returns the number of
    /// firings that launched successfully.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        METRICS.ticks.fetch_add(1, Ordering::Relaxed);

        let mut fired = 0;
        for scheduled in &mut self.scheduled {
            match evaluate(&mut scheduled.table, |t| t.run_pending_at(now)) {
                Ok(n) => {
                    if n > 0 {
                        log::debug!("plugin {}: {} job(s) due", scheduled.name, n);
                    }
                    fired += n;
                }
                Err(e) => {
                    METRICS.tick_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("plugin {}: {:#}", scheduled.name, e);
                }
            }
        }
        fired
    }

    /// Runs the tick loop.
    ///
    /// GUARANTEES:
    /// - Never returns
    /// - Keeps ticking with zero collectors
    ///
    pub async fn run_forever(mut self) {
        log::info!("running at scheduled time");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.tick();
        }
    }
}

/// Runs one table operation, turning a panic into an error.
fn evaluate(
    table: &mut CadenceTable,
    op: impl FnOnce(&mut CadenceTable) -> anyhow::Result<usize>,
) -> anyhow::Result<usize> {
    catch_unwind(AssertUnwindSafe(|| op(table)))
        .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::cadence::Rule;
    use crate::testing::{ManualClock, Mode, PausedClock, TestCollector};

    fn dispatcher(clock: &Arc<ManualClock>) -> Dispatcher {
        Dispatcher::new(DEFAULT_TICK).with_clock(Arc::clone(clock) as Arc<dyn Clock>)
    }

    #[test]
    fn failing_collector_does_not_stop_the_next_one() {
        let clock = Arc::new(ManualClock::default());
        let a = TestCollector::new("a").rule(Rule::seconds(1)).mode(Mode::Failing);
        let b = TestCollector::new("b").rule(Rule::seconds(1));
        let (a_calls, b_calls) = (a.calls(), b.calls());

        let mut dispatcher = dispatcher(&clock);
        dispatcher.register(&[a.arc(), b.arc()]);
        let b_before = b_calls.get();

        clock.advance(1);
        let fired = dispatcher.tick();

        assert_eq!(b_calls.get() - b_before, 1);
        assert_eq!(a_calls.get(), 2, "a is re-attempted every due tick");
        assert_eq!(fired, 1);
    }

    #[test]
    fn panicking_collector_is_isolated() {
        let clock = Arc::new(ManualClock::default());
        let a = TestCollector::new("a").rule(Rule::seconds(1)).mode(Mode::Panicking);
        let b = TestCollector::new("b").rule(Rule::seconds(1));
        let b_calls = b.calls();

        let mut dispatcher = dispatcher(&clock);
        dispatcher.register(&[a.arc(), b.arc()]);

        for _ in 0..3 {
            clock.advance(1);
            dispatcher.tick();
        }

        assert_eq!(dispatcher.len(), 2);
        assert_eq!(b_calls.get(), 4);
    }

    #[test]
    fn inactive_collector_is_never_scheduled() {
        let clock = Arc::new(ManualClock::default());
        let idle = TestCollector::new("idle").rule(Rule::seconds(1)).inactive();
        let calls = idle.calls();

        let mut dispatcher = dispatcher(&clock);
        dispatcher.register(&[idle.arc()]);
        clock.advance(5);
        dispatcher.tick();

        assert!(dispatcher.is_empty());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn panicking_scheduler_skips_only_that_collector() {
        let clock = Arc::new(ManualClock::default());
        let broken = TestCollector::new("broken").mode(Mode::BrokenScheduler);
        let ok = TestCollector::new("ok").rule(Rule::seconds(1));
        let calls = ok.calls();

        let mut dispatcher = dispatcher(&clock);
        dispatcher.register(&[broken.arc(), ok.arc()]);

        assert_eq!(dispatcher.len(), 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn catch_up_fires_everything_once() {
        let clock = Arc::new(ManualClock::default());
        let daily = TestCollector::new("daily").rule(Rule::daily_at("06:00").unwrap());
        let calls = daily.calls();

        let mut dispatcher = dispatcher(&clock);
        dispatcher.register(&[daily.arc()]);
        assert_eq!(calls.get(), 1);

        clock.advance(60);
        dispatcher.tick();
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_dispatcher_runs_forever() {
        let handle = tokio::spawn(Dispatcher::new(DEFAULT_TICK).run_forever());

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_runs_are_launched_on_every_due_tick() {
        let clock = Arc::new(PausedClock::start());
        // body sleeps 10s, twice the 5s interval
        let slow = TestCollector::new("slow")
            .rule(Rule::seconds(5))
            .mode(Mode::Detached(Duration::from_secs(10)));
        let (launched, completed) = (slow.calls(), slow.completions());

        let mut dispatcher = Dispatcher::new(DEFAULT_TICK).with_clock(clock);
        dispatcher.register(&[slow.arc()]);
        let handle = tokio::spawn(dispatcher.run_forever());

        tokio::time::sleep(Duration::from_millis(12_500)).await;

        // due at t=0 (catch-up), t=5 and t=10
        assert_eq!(launched.get(), 3);
        assert_eq!(completed.get(), 1);
        handle.abort();
    }
}
