//! Thread-local tracker
//!
//! Free functions mirroring [`Tracker`] against a thread-local instance, for
//! code that wants the implicit current tracker. The tracker itself never
//! crosses threads through this module; each thread installs its own.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::{InitOptions, ParamValue, RunState, Tracker};

thread_local! {
    static TRACKER: RefCell<Option<Tracker>> = const { RefCell::new(None) };
}

/// Install `tracker` as this thread's current tracker, returning the
/// previous one.
pub fn install(tracker: Tracker) -> Option<Tracker> {
    TRACKER.with(|slot| slot.borrow_mut().replace(tracker))
}

/// Remove and return this thread's current tracker.
pub fn uninstall() -> Option<Tracker> {
    TRACKER.with(|slot| slot.borrow_mut().take())
}

/// Run `f` against this thread's current tracker.
///
/// # Errors
///
/// [`Error::InvalidArgument`] when no tracker is installed; `f`'s errors
/// unchanged.
pub fn with<R>(f: impl FnOnce(&mut Tracker) -> Result<R>) -> Result<R> {
    TRACKER.with(|slot| {
        let mut guard = slot.borrow_mut();
        let tracker = guard.as_mut().ok_or_else(|| {
            Error::InvalidArgument(
                "no tracker installed on this thread; call global::install first".to_string(),
            )
        })?;
        f(tracker)
    })
}

/// [`Tracker::init`] on the thread-local tracker.
///
/// # Errors
///
/// See [`with`] and [`Tracker::init`].
pub fn init(options: InitOptions) -> Result<()> {
    with(|tracker| tracker.init(options))
}

/// [`Tracker::start_run`] on the thread-local tracker; returns the run's
/// context id.
///
/// # Errors
///
/// See [`with`] and [`Tracker::start_run`].
pub fn start_run(name: &str, resume: bool) -> Result<String> {
    with(|tracker| {
        tracker
            .start_run(name, resume)
            .map(|run| run.context_name().context_id.clone())
    })
}

/// [`Tracker::end_run`] on the thread-local tracker.
///
/// # Errors
///
/// See [`with`] and [`Tracker::end_run`].
pub fn end_run(state: RunState) -> Result<()> {
    with(|tracker| tracker.end_run(state))
}

/// [`Tracker::log_params`] on the thread-local tracker.
///
/// # Errors
///
/// See [`with`] and [`Tracker::log_params`].
pub fn log_params(params: BTreeMap<String, ParamValue>) -> Result<()> {
    with(|tracker| tracker.log_params(params))
}

/// [`Tracker::log_metrics`] on the thread-local tracker.
///
/// # Errors
///
/// See [`with`] and [`Tracker::log_metrics`].
pub fn log_metrics(metrics: BTreeMap<String, ParamValue>) -> Result<()> {
    with(|tracker| tracker.log_metrics(metrics))
}

/// [`Tracker::log_time_series_metrics`] on the thread-local tracker.
///
/// # Errors
///
/// See [`with`] and [`Tracker::log_time_series_metrics`].
pub fn log_time_series_metrics(
    metrics: BTreeMap<String, f64>,
    step: Option<i64>,
    wall_time: Option<f64>,
) -> Result<()> {
    with(|tracker| tracker.log_time_series_metrics(metrics, step, wall_time))
}
