//! Per-run time-series resource cache
//!
//! Time-series ids are allocated server-side, so the first value for a tag
//! has to create the resource and remember the assigned name. Create races
//! with other writers resolve through a display-name listing on the parent.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::api::tensorboard::{TensorboardService, TensorboardTimeSeries, TimeSeriesSpec};
use crate::error::{Error, Result};
use crate::names::TensorboardRunName;

/// Get-or-create cache from tag to time-series resource, scoped to one run.
///
/// Entries are never evicted for the lifetime of the owning sender.
pub struct TimeSeriesResourceManager {
    service: Arc<dyn TensorboardService>,
    run: TensorboardRunName,
    cache: FxHashMap<String, TensorboardTimeSeries>,
}

impl TimeSeriesResourceManager {
    /// Create a cache for `run`.
    #[must_use]
    pub fn new(service: Arc<dyn TensorboardService>, run: TensorboardRunName) -> Self {
        Self {
            service,
            run,
            cache: FxHashMap::default(),
        }
    }

    /// The run this cache is scoped to.
    #[must_use]
    pub const fn run(&self) -> &TensorboardRunName {
        &self.run
    }

    /// Resolve the time series for `tag`, creating it on first sight.
    ///
    /// On an already-exists rejection the parent is listed filtered by
    /// `display_name == tag` and the single match is adopted.
    ///
    /// # Errors
    ///
    /// Propagates service errors; an already-exists race that resolves to
    /// zero or multiple matches is an error.
    pub fn get_or_create(
        &mut self,
        tag: &str,
        spec: impl FnOnce() -> TimeSeriesSpec,
    ) -> Result<&TensorboardTimeSeries> {
        if !self.cache.contains_key(tag) {
            let series = match self.service.create_tensorboard_time_series(&self.run, spec()) {
                Ok(series) => series,
                Err(err) if err.is_already_exists() => self.adopt_existing(tag)?,
                Err(err) => return Err(err),
            };
            self.cache.insert(tag.to_string(), series);
        }
        Ok(&self.cache[tag])
    }

    fn adopt_existing(&self, tag: &str) -> Result<TensorboardTimeSeries> {
        let mut matches = self
            .service
            .list_tensorboard_time_series(&self.run, Some(tag))?;
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(Error::Other(format!(
                "time series {tag:?} reported as existing under {} but not listable",
                self.run
            ))),
            n => Err(Error::Other(format!(
                "expected one time series named {tag:?} under {}, found {n}",
                self.run
            ))),
        }
    }
}
