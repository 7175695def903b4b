//! Typed resource names
//!
//! The control plane addresses everything by slash-delimited resource name.
//! Rather than passing raw strings around (and keying caches on them), every
//! resource kind gets a handle carrying the parsed tuple. Handles format to
//! the exact grammar the control plane requires:
//!
//! ```text
//! projects/{p}/locations/{l}/metadataStores/default/contexts/{id}
//! projects/{p}/locations/{l}/metadataStores/default/executions/{id}
//! projects/{p}/locations/{l}/metadataStores/default/artifacts/{id}
//! projects/{p}/locations/{l}/tensorboards/{tb}
//!   /experiments/{exp}
//!     /runs/{run}
//!       /timeSeries/{ts}
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// Maximum length for a user-assigned resource id, and for a run's combined
/// `{experiment}-{run}` context id.
pub const MAX_ID_LENGTH: usize = 128;

/// Validate a user-assigned resource id.
///
/// Ids must match `[a-z0-9][a-z0-9-]{0,127}`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when the id is empty, too long, or
/// contains a character outside the grammar.
pub fn validate_resource_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidArgument(
            "resource id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "resource id {id:?} is {} characters; the limit is {MAX_ID_LENGTH}",
            id.len()
        )));
    }
    let mut chars = id.chars();
    let first = chars.next().unwrap_or('-');
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(Error::InvalidArgument(format!(
            "resource id {id:?} must start with a lowercase letter or digit"
        )));
    }
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(Error::InvalidArgument(format!(
                "resource id {id:?} contains {c:?}; only [a-z0-9-] are allowed"
            )));
        }
    }
    Ok(())
}

/// Build the combined `{experiment}-{run}` context id for an experiment run.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when either part fails id validation or
/// the combined id exceeds [`MAX_ID_LENGTH`].
pub fn run_context_id(experiment: &str, run: &str) -> Result<String> {
    validate_resource_id(experiment)?;
    validate_resource_id(run)?;
    let combined = format!("{experiment}-{run}");
    if combined.len() > MAX_ID_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "run id {combined:?} is {} characters after the experiment prefix; the limit is {MAX_ID_LENGTH}",
            combined.len()
        )));
    }
    Ok(combined)
}

fn parse_err(kind: &str, name: &str) -> Error {
    Error::InvalidArgument(format!("{name:?} is not a valid {kind} resource name"))
}

/// Split a name into segments, checking the literal segments of the pattern.
/// `pattern` alternates literal collection ids with `*` capture slots.
fn match_segments<'a>(name: &'a str, pattern: &[&str]) -> Option<Vec<&'a str>> {
    let segments: Vec<&str> = name.split('/').collect();
    if segments.len() != pattern.len() {
        return None;
    }
    let mut captures = Vec::new();
    for (segment, expected) in segments.iter().zip(pattern) {
        if *expected == "*" {
            if segment.is_empty() {
                return None;
            }
            captures.push(*segment);
        } else if segment != expected {
            return None;
        }
    }
    Some(captures)
}

macro_rules! name_common {
    ($ty:ident) => {
        impl std::str::FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }
    };
}

/// Name of a metadata context (`metadataStores/default/contexts/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextName {
    /// Project id.
    pub project: String,
    /// Location id.
    pub location: String,
    /// Context id within the default metadata store.
    pub context_id: String,
}

impl ContextName {
    /// Create a context name in the default metadata store.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        context_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            context_id: context_id.into(),
        }
    }

    /// Parse a full context resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name does not match the
    /// context grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let caps = match_segments(
            name,
            &[
                "projects",
                "*",
                "locations",
                "*",
                "metadataStores",
                "default",
                "contexts",
                "*",
            ],
        )
        .ok_or_else(|| parse_err("context", name))?;
        Ok(Self::new(caps[0], caps[1], caps[2]))
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/metadataStores/default/contexts/{}",
            self.project, self.location, self.context_id
        )
    }
}

name_common!(ContextName);

/// Name of a metadata execution (`metadataStores/default/executions/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionName {
    /// Project id.
    pub project: String,
    /// Location id.
    pub location: String,
    /// Execution id within the default metadata store.
    pub execution_id: String,
}

impl ExecutionName {
    /// Create an execution name in the default metadata store.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            execution_id: execution_id.into(),
        }
    }

    /// Parse a full execution resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name does not match the
    /// execution grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let caps = match_segments(
            name,
            &[
                "projects",
                "*",
                "locations",
                "*",
                "metadataStores",
                "default",
                "executions",
                "*",
            ],
        )
        .ok_or_else(|| parse_err("execution", name))?;
        Ok(Self::new(caps[0], caps[1], caps[2]))
    }
}

impl fmt::Display for ExecutionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/metadataStores/default/executions/{}",
            self.project, self.location, self.execution_id
        )
    }
}

name_common!(ExecutionName);

/// Name of a metadata artifact (`metadataStores/default/artifacts/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    /// Project id.
    pub project: String,
    /// Location id.
    pub location: String,
    /// Artifact id within the default metadata store.
    pub artifact_id: String,
}

impl ArtifactName {
    /// Create an artifact name in the default metadata store.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        artifact_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// Parse a full artifact resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name does not match the
    /// artifact grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let caps = match_segments(
            name,
            &[
                "projects",
                "*",
                "locations",
                "*",
                "metadataStores",
                "default",
                "artifacts",
                "*",
            ],
        )
        .ok_or_else(|| parse_err("artifact", name))?;
        Ok(Self::new(caps[0], caps[1], caps[2]))
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/metadataStores/default/artifacts/{}",
            self.project, self.location, self.artifact_id
        )
    }
}

name_common!(ArtifactName);

/// Name of a tensorboard (`tensorboards/{tb}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorboardName {
    /// Project id.
    pub project: String,
    /// Location id.
    pub location: String,
    /// Tensorboard id.
    pub tensorboard: String,
}

impl TensorboardName {
    /// Create a tensorboard name.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        tensorboard: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            tensorboard: tensorboard.into(),
        }
    }

    /// Parse a full tensorboard resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name does not match the
    /// tensorboard grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let caps = match_segments(
            name,
            &["projects", "*", "locations", "*", "tensorboards", "*"],
        )
        .ok_or_else(|| parse_err("tensorboard", name))?;
        Ok(Self::new(caps[0], caps[1], caps[2]))
    }

    /// Name of a child experiment under this tensorboard.
    #[must_use]
    pub fn experiment(&self, experiment: impl Into<String>) -> TensorboardExperimentName {
        TensorboardExperimentName {
            tensorboard: self.clone(),
            experiment: experiment.into(),
        }
    }
}

impl fmt::Display for TensorboardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/tensorboards/{}",
            self.project, self.location, self.tensorboard
        )
    }
}

name_common!(TensorboardName);

/// Name of a tensorboard experiment (`tensorboards/{tb}/experiments/{exp}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorboardExperimentName {
    /// Parent tensorboard.
    pub tensorboard: TensorboardName,
    /// Experiment id.
    pub experiment: String,
}

impl TensorboardExperimentName {
    /// Parse a full tensorboard-experiment resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name does not match the
    /// tensorboard-experiment grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let caps = match_segments(
            name,
            &[
                "projects",
                "*",
                "locations",
                "*",
                "tensorboards",
                "*",
                "experiments",
                "*",
            ],
        )
        .ok_or_else(|| parse_err("tensorboard experiment", name))?;
        Ok(TensorboardName::new(caps[0], caps[1], caps[2]).experiment(caps[3]))
    }

    /// Name of a child run under this experiment.
    #[must_use]
    pub fn run(&self, run: impl Into<String>) -> TensorboardRunName {
        TensorboardRunName {
            experiment: self.clone(),
            run: run.into(),
        }
    }
}

impl fmt::Display for TensorboardExperimentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/experiments/{}", self.tensorboard, self.experiment)
    }
}

name_common!(TensorboardExperimentName);

/// Name of a tensorboard run (`.../experiments/{exp}/runs/{run}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorboardRunName {
    /// Parent experiment.
    pub experiment: TensorboardExperimentName,
    /// Run id (server-assigned).
    pub run: String,
}

impl TensorboardRunName {
    /// Parse a full tensorboard-run resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name does not match the
    /// tensorboard-run grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let caps = match_segments(
            name,
            &[
                "projects",
                "*",
                "locations",
                "*",
                "tensorboards",
                "*",
                "experiments",
                "*",
                "runs",
                "*",
            ],
        )
        .ok_or_else(|| parse_err("tensorboard run", name))?;
        Ok(TensorboardName::new(caps[0], caps[1], caps[2])
            .experiment(caps[3])
            .run(caps[4]))
    }

    /// Name of a child time series under this run.
    #[must_use]
    pub fn time_series(&self, time_series: impl Into<String>) -> TimeSeriesName {
        TimeSeriesName {
            run: self.clone(),
            time_series: time_series.into(),
        }
    }
}

impl fmt::Display for TensorboardRunName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/runs/{}", self.experiment, self.run)
    }
}

name_common!(TensorboardRunName);

/// Name of a tensorboard time series (`.../runs/{run}/timeSeries/{ts}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeSeriesName {
    /// Parent run.
    pub run: TensorboardRunName,
    /// Time series id (server-assigned).
    pub time_series: String,
}

impl TimeSeriesName {
    /// Parse a full time-series resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name does not match the
    /// time-series grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let caps = match_segments(
            name,
            &[
                "projects",
                "*",
                "locations",
                "*",
                "tensorboards",
                "*",
                "experiments",
                "*",
                "runs",
                "*",
                "timeSeries",
                "*",
            ],
        )
        .ok_or_else(|| parse_err("time series", name))?;
        Ok(TensorboardName::new(caps[0], caps[1], caps[2])
            .experiment(caps[3])
            .run(caps[4])
            .time_series(caps[5]))
    }
}

impl fmt::Display for TimeSeriesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/timeSeries/{}", self.run, self.time_series)
    }
}

name_common!(TimeSeriesName);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_resource_id_accepts_grammar() {
        assert!(validate_resource_id("exp-001").is_ok());
        assert!(validate_resource_id("0run").is_ok());
        assert!(validate_resource_id(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_validate_resource_id_rejects_bad_ids() {
        assert!(validate_resource_id("").is_err());
        assert!(validate_resource_id("-leading-dash").is_err());
        assert!(validate_resource_id("Upper").is_err());
        assert!(validate_resource_id("under_score").is_err());
        assert!(validate_resource_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_run_context_id_length_boundary() {
        // 3 ("exp") + 1 ("-") + 124 = exactly 128: accepted.
        let ok = run_context_id("exp", &"r".repeat(124)).unwrap();
        assert_eq!(ok.len(), 128);

        // One more character: rejected.
        assert!(run_context_id("exp", &"r".repeat(125)).is_err());
    }

    #[test]
    fn test_context_name_round_trip() {
        let name = ContextName::new("proj", "us-central1", "exp-r1");
        let formatted = name.to_string();
        assert_eq!(
            formatted,
            "projects/proj/locations/us-central1/metadataStores/default/contexts/exp-r1"
        );
        assert_eq!(ContextName::parse(&formatted).unwrap(), name);
    }

    #[test]
    fn test_tensorboard_hierarchy_round_trip() {
        let ts = TensorboardName::new("proj", "us-central1", "tb1")
            .experiment("exp")
            .run("abc123")
            .time_series("ts9");
        let formatted = ts.to_string();
        assert_eq!(
            formatted,
            "projects/proj/locations/us-central1/tensorboards/tb1/experiments/exp/runs/abc123/timeSeries/ts9"
        );
        assert_eq!(TimeSeriesName::parse(&formatted).unwrap(), ts);
    }

    #[test]
    fn test_parse_rejects_wrong_collection() {
        assert!(ContextName::parse(
            "projects/p/locations/l/metadataStores/default/executions/x"
        )
        .is_err());
        assert!(TensorboardRunName::parse("projects/p/locations/l/tensorboards/tb").is_err());
        assert!(ExecutionName::parse("not-a-name").is_err());
    }

    #[test]
    fn test_artifact_and_execution_round_trip() {
        let a = ArtifactName::new("p", "l", "art-1");
        assert_eq!(ArtifactName::parse(&a.to_string()).unwrap(), a);
        let e = ExecutionName::new("p", "l", "exec-1");
        assert_eq!(ExecutionName::parse(&e.to_string()).unwrap(), e);
    }
}
