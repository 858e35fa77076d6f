//! Time-driven background jobs.
//!
//! A [`Scheduler`] owns up to 64 jobs, each keyed by a 5-field cron
//! expression (minute, hour, day-of-month, month, day-of-week) supporting
//! `*`, exact values, and `*/N` steps.  The run loop wakes every 30 seconds,
//! sleeping in 1-second slices so shutdown latency stays around a second,
//! and fires each matching job at most once per minute.
//!
//! Register all jobs before calling [`Scheduler::start`]; the job table is
//! owned by the run loop once it begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};

/// Maximum number of registered jobs.
pub const MAX_JOBS: usize = 64;

/// One field of a cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronField {
    /// `*` — matches every value.
    Wildcard,
    /// A literal value.
    Exact(u8),
    /// `*/N` — matches values divisible by N.
    Step(u8),
}

impl CronField {
    fn parse(field: &str) -> Result<CronField, String> {
        if field == "*" {
            return Ok(CronField::Wildcard);
        }
        if let Some(step) = field.strip_prefix("*/") {
            let step: u8 = step
                .parse()
                .map_err(|_| format!("bad step value: {}", field))?;
            if step == 0 {
                return Err("step value must be positive".to_owned());
            }
            return Ok(CronField::Step(step));
        }
        let value: u8 = field
            .parse()
            .map_err(|_| format!("bad field value: {}", field))?;
        Ok(CronField::Exact(value))
    }

    fn matches(&self, value: u8) -> bool {
        match self {
            CronField::Wildcard => true,
            CronField::Exact(expected) => value == *expected,
            CronField::Step(step) => value % step == 0,
        }
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    /// Parse `minute hour day-of-month month day-of-week`.
    pub fn parse(expression: &str) -> Result<CronExpr, String> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields, got {}: {}",
                fields.len(),
                expression
            ));
        }
        Ok(CronExpr {
            minute: CronField::parse(fields[0])?,
            hour: CronField::parse(fields[1])?,
            day_of_month: CronField::parse(fields[2])?,
            month: CronField::parse(fields[3])?,
            day_of_week: CronField::parse(fields[4])?,
        })
    }

    /// Match against explicit field values (day_of_week: 0 = Sunday).
    pub fn matches_at(&self, minute: u8, hour: u8, day_of_month: u8, month: u8, day_of_week: u8) -> bool {
        self.minute.matches(minute)
            && self.hour.matches(hour)
            && self.day_of_month.matches(day_of_month)
            && self.month.matches(month)
            && self.day_of_week.matches(day_of_week)
    }

    /// Match against a local clock reading.
    pub fn matches(&self, time: &chrono::DateTime<Local>) -> bool {
        self.matches_at(
            time.minute() as u8,
            time.hour() as u8,
            time.day() as u8,
            time.month() as u8,
            time.weekday().num_days_from_sunday() as u8,
        )
    }
}

/// Callback invoked when a job fires; runs on the scheduler task.
pub type JobCallback = Box<dyn FnMut() + Send>;

struct CronJob {
    name: String,
    expr: CronExpr,
    callback: JobCallback,
    /// Unix timestamp of the last fire; gates one fire per minute.
    last_fire: i64,
    active: bool,
}

/// Fixed-capacity job table plus its run loop.
pub struct Scheduler {
    jobs: Vec<CronJob>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(running: Arc<AtomicBool>) -> Scheduler {
        Scheduler {
            jobs: Vec::new(),
            running,
        }
    }

    /// Register a job.  Fails on a full table, a duplicate name, or a
    /// malformed expression.
    pub fn add(
        &mut self,
        name: &str,
        expression: &str,
        callback: JobCallback,
    ) -> Result<(), String> {
        if self.jobs.len() >= MAX_JOBS {
            return Err(format!("job table full ({} jobs)", MAX_JOBS));
        }
        if self.jobs.iter().any(|job| job.name == name) {
            return Err(format!("duplicate job name: {}", name));
        }
        let expr = CronExpr::parse(expression)?;
        self.jobs.push(CronJob {
            name: name.to_owned(),
            expr,
            callback,
            last_fire: 0,
            active: true,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Consume the scheduler and run it on its own task.
    ///
    /// The loop exits when the shared running flag clears; sleeps are sliced
    /// to one second so shutdown is prompt.
    pub fn start(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            log::info!("scheduler: running {} job(s)", self.jobs.len());
            while self.running.load(Ordering::Relaxed) {
                self.tick(Local::now());
                for _ in 0..30 {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
            log::info!("scheduler: stopped");
        })
    }

    /// Evaluate all jobs against one clock reading.
    fn tick(&mut self, now: chrono::DateTime<Local>) {
        let timestamp = now.timestamp();
        let minute_anchor = timestamp - timestamp % 60;
        for job in self.jobs.iter_mut().filter(|job| job.active) {
            if job.expr.matches(&now) && job.last_fire < minute_anchor {
                job.last_fire = timestamp;
                log::debug!("scheduler: firing {}", job.name);
                (job.callback)();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_field_matches_multiples() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        assert!(expr.matches_at(15, 3, 1, 6, 0));
        assert!(!expr.matches_at(17, 3, 1, 6, 0));
        assert!(expr.matches_at(0, 3, 1, 6, 0));
    }

    #[test]
    fn exact_minute_matches_only_itself() {
        let expr = CronExpr::parse("30 * * * *").unwrap();
        assert!(expr.matches_at(30, 12, 1, 6, 0));
        assert!(!expr.matches_at(29, 12, 1, 6, 0));
    }

    #[test]
    fn all_fields_must_match() {
        let expr = CronExpr::parse("0 9 * * 1").unwrap();
        assert!(expr.matches_at(0, 9, 15, 6, 1));
        assert!(!expr.matches_at(0, 9, 15, 6, 2)); // wrong weekday
        assert!(!expr.matches_at(0, 10, 15, 6, 1)); // wrong hour
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("x * * * *").is_err());
        assert!(CronExpr::parse("* * * * * *").is_err());
    }

    #[test]
    fn jobs_fire_once_per_minute() {
        let running = Arc::new(AtomicBool::new(true));
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();

        let mut scheduler = Scheduler::new(running);
        scheduler
            .add(
                "heartbeat",
                "* * * * *",
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let now = Local::now();
        scheduler.tick(now);
        scheduler.tick(now); // same minute: suppressed
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        scheduler.tick(now + chrono::Duration::seconds(60));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_names_and_full_table_are_rejected() {
        let mut scheduler = Scheduler::new(Arc::new(AtomicBool::new(true)));
        scheduler.add("a", "* * * * *", Box::new(|| {})).unwrap();
        assert!(scheduler.add("a", "* * * * *", Box::new(|| {})).is_err());
        for i in 1..MAX_JOBS {
            scheduler
                .add(&format!("job{}", i), "* * * * *", Box::new(|| {}))
                .unwrap();
        }
        assert!(scheduler
            .add("overflow", "* * * * *", Box::new(|| {}))
            .is_err());
    }
}
