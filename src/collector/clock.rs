use chrono::{Local, NaiveDateTime};

/// Source of "now" for the scheduling runtime.
///
/// Cadence rules are expressed in local wall-clock time ("daily at
/// 06:00"), so the clock hands out naive local datetimes.
///
/// The dispatcher owns an `Arc<dyn Clock>`; tests swap in a clock
/// driven by paused tokio time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}
