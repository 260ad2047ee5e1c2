//! Suite runner: executes test units under a concurrency bound.
//!
//! Dispatch works top-level unit by top-level unit:
//!
//! 1. Acquire a slot on the semaphore (blocks once `parallel` units hold one).
//! 2. Spawn the unit; the slot is held until the unit and all of its
//!    children (for a group: prepare, members, cleanup) are done.
//! 3. Wait until the unit either calls `H::parallel()` or finishes before
//!    dispatching the next one.
//!
//! Joining every dispatched unit's task handle is the completion barrier.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info};

use crate::error::HarnessError;
use crate::group::GroupUnit;
use crate::h::{run_harness, Status, H};
use crate::pattern::Pattern;
use crate::tap::{write_report, TAP_FILE};
use crate::unit::{Tests, Unit};

/// Suite options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory for the TAP report; no report is written when unset.
    pub output_dir: Option<PathBuf>,
    /// Maximum number of top-level units running at once.
    pub parallel: usize,
    /// Print verdicts of passing and skipped tests too.
    pub verbose: bool,
    /// Only run tests whose names match this pattern.
    pub pattern: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            output_dir: None,
            parallel: 1,
            verbose: false,
            pattern: "*".to_string(),
        }
    }
}

/// Aggregate verdict counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// Final record of one counted test.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub name: String,
    pub status: Status,
    pub duration: Duration,
    pub logs: Vec<String>,
}

impl TestReport {
    fn from_harness(h: &H) -> Self {
        Self {
            name: h.name().to_string(),
            status: h.status(),
            duration: h.duration(),
            logs: h.logs(),
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    counts: Counts,
    reports: Vec<TestReport>,
}

/// Shared state handed to every dispatched unit.
#[derive(Clone)]
struct Dispatch {
    pattern: Pattern,
    verbose: bool,
    tally: Arc<Mutex<Tally>>,
}

impl Dispatch {
    async fn run_unit(&self, unit: Unit, release: watch::Sender<bool>) {
        match unit {
            Unit::Func { name, run } => {
                let h = H::with_release(name, release);
                run_harness(&h, run(Arc::clone(&h))).await;
                self.record(&h);
            }
            Unit::Group(group) => self.run_group(group, release).await,
        }
    }

    async fn run_group(&self, group: Arc<dyn GroupUnit>, release: watch::Sender<bool>) {
        let members = Unit::Group(Arc::clone(&group)).matching(&self.pattern);
        if members.is_empty() {
            return;
        }

        let prepare = H::with_release(format!("{}.Prepare", group.group_name()), release.clone());
        run_harness(&prepare, Arc::clone(&group).prepare(Arc::clone(&prepare))).await;
        self.print_verdict(&prepare);

        for name in members {
            let method = name
                .split_once('.')
                .map(|(_, method)| method.to_string())
                .unwrap_or_else(|| name.clone());
            let h = H::with_release(name, release.clone());

            if prepare.failed() {
                h.error(format!("{} failed", prepare.name()));
            } else if prepare.skipped() {
                h.record_skip(format!("{} skipped", prepare.name()));
            } else if let Some(body) = Arc::clone(&group).member(&method, Arc::clone(&h)) {
                run_harness(&h, body).await;
            } else {
                h.error(format!("no such group method: {method}"));
            }
            h.finish();
            self.record(&h);
        }

        if !prepare.failed() && !prepare.skipped() {
            let cleanup = H::with_release(format!("{}.Cleanup", group.group_name()), release);
            run_harness(&cleanup, Arc::clone(&group).cleanup(Arc::clone(&cleanup))).await;
            self.print_verdict(&cleanup);
        }
    }

    /// Count a finished unit. The only place counters change.
    fn record(&self, h: &H) {
        {
            let mut tally = self.tally.lock();
            match h.status() {
                Status::Failed => tally.counts.failed += 1,
                Status::Skipped => tally.counts.skipped += 1,
                _ => tally.counts.passed += 1,
            }
            tally.reports.push(TestReport::from_harness(h));
        }
        self.print_verdict(h);
    }

    fn print_verdict(&self, h: &H) {
        let status = h.status();
        if status != Status::Failed && !self.verbose {
            return;
        }

        let label = match status {
            Status::Failed => status.as_str().red().bold(),
            Status::Skipped => status.as_str().yellow(),
            _ => status.as_str().green(),
        };
        println!(
            "--- {}: {} ({:.2}s)",
            label,
            h.name(),
            h.duration().as_secs_f64()
        );
        for line in h.logs().iter().flat_map(|entry| entry.lines()) {
            println!("        {}", line);
        }
    }
}

/// A runnable set of tests.
pub struct Suite {
    opts: Options,
    tests: Tests,
    tally: Arc<Mutex<Tally>>,
}

impl Suite {
    pub fn new(opts: Options, tests: Tests) -> Self {
        Self {
            opts,
            tests,
            tally: Arc::new(Mutex::new(Tally::default())),
        }
    }

    /// Every test name, sorted. Nothing is executed.
    pub fn list(&self) -> Vec<String> {
        self.tests.list()
    }

    /// Counts of the last run.
    pub fn counts(&self) -> Counts {
        self.tally.lock().counts
    }

    /// Reports of the last run, sorted by test name.
    pub fn reports(&self) -> Vec<TestReport> {
        let mut reports = self.tally.lock().reports.clone();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }

    /// Run every matching test. Returns `TestsFailed` if any test failed.
    pub async fn run(&self) -> Result<Counts, HarnessError> {
        let pattern = Pattern::new(&self.opts.pattern)?;
        *self.tally.lock() = Tally::default();

        let dispatch = Dispatch {
            pattern,
            verbose: self.opts.verbose,
            tally: Arc::clone(&self.tally),
        };

        let gate = Arc::new(Semaphore::new(self.opts.parallel.max(1)));
        let mut running = Vec::new();

        for unit in self.tests.units() {
            if unit.matching(&dispatch.pattern).is_empty() {
                continue;
            }

            let permit = Arc::clone(&gate)
                .acquire_owned()
                .await
                .map_err(|_| HarnessError::GateClosed)?;

            let (release, mut released) = watch::channel(false);
            let dispatch = dispatch.clone();
            let unit = unit.clone();
            running.push(tokio::spawn(async move {
                let _permit = permit;
                dispatch.run_unit(unit, release.clone()).await;
                release.send_replace(true);
            }));

            let _ = released.wait_for(|released| *released).await;
        }

        for joined in join_all(running).await {
            if let Err(err) = joined {
                error!(error = %err, "test unit task failed");
            }
        }

        let counts = self.counts();
        println!("FAILED:  {}", counts.failed);
        println!("PASSED:  {}", counts.passed);
        println!("SKIPPED: {}", counts.skipped);
        info!(
            passed = counts.passed,
            failed = counts.failed,
            skipped = counts.skipped,
            "Suite finished"
        );

        if let Some(dir) = &self.opts.output_dir {
            write_report(&dir.join(TAP_FILE), &self.reports())?;
        }

        if counts.failed > 0 {
            return Err(HarnessError::TestsFailed {
                failed: counts.failed,
            });
        }
        Ok(counts)
    }
}
