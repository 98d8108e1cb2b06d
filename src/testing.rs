//! Test doubles shared by the unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use parking_lot::Mutex;

use crate::collector::{
    cadence::{CadenceTable, Job, Rule},
    clock::Clock,
    executor,
};
use crate::plugins::{
    contract::{Collector, PluginInfo},
    error::PluginError,
    settings::SettingsStore,
};

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a `TestCollector` does when fired.
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// Counts inline, launch succeeds.
    Inline,
    /// Counts inline, launch returns an error.
    Failing,
    /// Counts inline, then panics.
    Panicking,
    /// `scheduler()` itself panics.
    BrokenScheduler,
    /// Launches `job()` detached; the body sleeps for the duration.
    Detached(Duration),
}

pub struct TestCollector {
    info: PluginInfo,
    active: bool,
    settings: SettingsStore,
    rule: Rule,
    mode: Mode,
    calls: Counter,
    completions: Counter,
    _dir: Option<tempfile::TempDir>,
}

impl TestCollector {
    /// Collector with a private, empty settings directory.
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut collector = Self::load(name, dir.path()).expect("empty settings");
        collector._dir = Some(dir);
        collector
    }

    /// Collector loading its settings from `dir`, like a catalog entry.
    pub fn load(name: &str, dir: &Path) -> Result<Self, PluginError> {
        let settings = SettingsStore::load(dir)?;
        Ok(Self {
            info: PluginInfo::new(name, "0.1", format!("{name} test collector"), format!("/test/{name}")),
            active: settings.get_bool("active").unwrap_or(true),
            settings,
            rule: Rule::seconds(5),
            mode: Mode::Inline,
            calls: Counter::default(),
            completions: Counter::default(),
            _dir: None,
        })
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule = rule;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Number of firings (inline modes) or job starts (detached mode).
    pub fn calls(&self) -> Counter {
        self.calls.clone()
    }

    /// Number of job bodies that ran to the end.
    pub fn completions(&self) -> Counter {
        self.completions.clone()
    }

    pub fn arc(self) -> Arc<dyn Collector> {
        Arc::new(self)
    }

    fn fire_inline(&self) -> anyhow::Result<()> {
        self.calls.bump();
        match self.mode {
            Mode::Failing => Err(anyhow!("{} failed", self.info.name)),
            Mode::Panicking => panic!("{} panicked", self.info.name),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Collector for TestCollector {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn active(&self) -> bool {
        self.active
    }

    fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    fn scheduler(self: Arc<Self>) -> CadenceTable {
        let job: Job = match self.mode {
            Mode::BrokenScheduler => panic!("scheduler of {} is broken", self.info.name),
            Mode::Detached(_) => executor::detached(Arc::clone(&self)),
            Mode::Inline | Mode::Failing | Mode::Panicking => {
                let me = Arc::clone(&self);
                Arc::new(move || me.fire_inline())
            }
        };
        CadenceTable::new().with(self.rule, job)
    }

    async fn job(&self) -> anyhow::Result<()> {
        self.calls.bump();
        if let Mode::Detached(d) = self.mode {
            tokio::time::sleep(d).await;
        }
        self.completions.bump();

        match self.mode {
            Mode::Failing => Err(anyhow!("{} failed", self.info.name)),
            _ => Ok(()),
        }
    }
}

pub fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid date")
}

/// Clock moved by hand.
pub struct ManualClock(Mutex<NaiveDateTime>);

impl Default for ManualClock {
    fn default() -> Self {
        Self(Mutex::new(base_time()))
    }
}

impl ManualClock {
    pub fn advance(&self, secs: i64) {
        *self.0.lock() += TimeDelta::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock()
    }
}

/// Clock following tokio time, for `start_paused` tests.
pub struct PausedClock {
    base: NaiveDateTime,
    origin: tokio::time::Instant,
}

impl PausedClock {
    pub fn start() -> Self {
        Self {
            base: base_time(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::zero());
        self.base + elapsed
    }
}
