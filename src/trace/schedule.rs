//! Schedule traces.
//!
//! A [`ScheduleTrace`] is the ordered record of every decision the scheduler
//! took in one iteration: which operation it handed control to, and the
//! value of every nondeterministic choice. Feeding a trace back through the
//! replay strategy reproduces the iteration exactly.
//!
//! # Wire formats
//!
//! | Codec | API | Typical use |
//! |-------|-----|-------------|
//! | JSON | [`ScheduleTrace::to_json`] / [`ScheduleTrace::from_json`] | bug reports, diffing |
//! | MessagePack | [`ScheduleTrace::to_bytes`] / [`ScheduleTrace::from_bytes`] | compact storage |
//!
//! [`ScheduleTrace::save`] and [`ScheduleTrace::load`] pick the codec from the
//! file extension: `.json` is JSON, anything else is MessagePack.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::runtime::OperationId;

// =============================================================================
// Trace Metadata
// =============================================================================

/// Current schema version for schedule traces.
///
/// Increment this when making breaking changes to the schema.
pub const SCHEDULE_SCHEMA_VERSION: u32 = 1;

/// Header describing where a trace came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceMetadata {
    /// Schema version for forward compatibility.
    pub version: u32,

    /// Seed of the campaign that recorded the trace.
    pub seed: u64,

    /// Description of the strategy that produced the trace.
    #[serde(default)]
    pub strategy: String,

    /// Zero-based iteration index within the campaign.
    #[serde(default)]
    pub iteration: u64,

    /// Step bound of the recording strategy (0 = unbounded).
    #[serde(default)]
    pub step_bound: u64,

    /// Hitting the step bound was reported as a bug.
    #[serde(default)]
    pub bound_is_bug: bool,

    /// The iteration ended because the step bound was reached.
    #[serde(default)]
    pub ended_on_bound: bool,
}

impl TraceMetadata {
    /// Creates metadata for the given seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            version: SCHEDULE_SCHEMA_VERSION,
            seed,
            strategy: String::new(),
            iteration: 0,
            step_bound: 0,
            bound_is_bug: false,
            ended_on_bound: false,
        }
    }

    /// Sets the strategy description.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Sets the iteration index.
    #[must_use]
    pub const fn with_iteration(mut self, iteration: u64) -> Self {
        self.iteration = iteration;
        self
    }

    /// Sets the step bound and whether hitting it is a bug.
    #[must_use]
    pub const fn with_step_bound(mut self, bound: u64, is_bug: bool) -> Self {
        self.step_bound = bound;
        self.bound_is_bug = is_bug;
        self
    }

    /// Checks if this trace is compatible with the current schema.
    #[must_use]
    pub const fn is_compatible(&self) -> bool {
        self.version == SCHEDULE_SCHEMA_VERSION
    }
}

impl Default for TraceMetadata {
    fn default() -> Self {
        Self::new(0)
    }
}

// =============================================================================
// Steps
// =============================================================================

/// One scheduler decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ScheduleStep {
    /// Control was handed to an operation.
    Scheduled {
        /// Operation that was scheduled.
        source_id: OperationId,
    },
    /// A boolean choice was resolved.
    Boolean {
        /// The value chosen.
        value: bool,
    },
    /// A boolean choice with a fairness identifier was resolved.
    FairBoolean {
        /// Caller-provided identifier of the choice site.
        id: String,
        /// The value chosen.
        value: bool,
    },
    /// An integer choice was resolved.
    Integer {
        /// The value chosen.
        value: u32,
    },
}

impl ScheduleStep {
    /// Returns true if this step is a scheduling decision.
    #[must_use]
    pub const fn is_scheduling(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }
}

// =============================================================================
// Trace
// =============================================================================

/// The decisions of one iteration, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleTrace {
    /// Trace header.
    pub metadata: TraceMetadata,
    /// Recorded decisions.
    pub steps: Vec<ScheduleStep>,
}

impl ScheduleTrace {
    /// Creates an empty trace.
    #[must_use]
    pub const fn new(metadata: TraceMetadata) -> Self {
        Self {
            metadata,
            steps: Vec::new(),
        }
    }

    /// Records a scheduling decision.
    pub fn add_scheduling_choice(&mut self, source_id: OperationId) {
        self.steps.push(ScheduleStep::Scheduled { source_id });
    }

    /// Records a boolean choice.
    pub fn add_boolean_choice(&mut self, value: bool) {
        self.steps.push(ScheduleStep::Boolean { value });
    }

    /// Records a boolean choice made at a fairness-tracked site.
    pub fn add_fair_boolean_choice(&mut self, id: impl Into<String>, value: bool) {
        self.steps.push(ScheduleStep::FairBoolean {
            id: id.into(),
            value,
        });
    }

    /// Records an integer choice.
    pub fn add_integer_choice(&mut self, value: u32) {
        self.steps.push(ScheduleStep::Integer { value });
    }

    /// Returns the step at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ScheduleStep> {
        self.steps.get(index)
    }

    /// Returns the number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterates over the recorded steps.
    pub fn iter(&self) -> impl Iterator<Item = &ScheduleStep> {
        self.steps.iter()
    }

    /// Returns true if both traces hold the same decisions, ignoring metadata.
    #[must_use]
    pub fn same_decisions(&self, other: &Self) -> bool {
        self.steps == other.steps
    }

    /// Serializes to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserializes from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a trace or the schema version differs.
    pub fn from_json(text: &str) -> Result<Self, TraceError> {
        let trace: Self = serde_json::from_str(text)?;
        trace.check_version()?;
        Ok(trace)
    }

    /// Serializes to MessagePack.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TraceError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserializes from MessagePack.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a trace or the schema version differs.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TraceError> {
        let trace: Self = rmp_serde::from_slice(bytes)?;
        trace.check_version()?;
        Ok(trace)
    }

    /// Writes the trace to `path`, as JSON if the extension is `.json`.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), TraceError> {
        let bytes = if is_json_path(path) {
            self.to_json()?.into_bytes()
        } else {
            self.to_bytes()?
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Reads a trace written by [`ScheduleTrace::save`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or decoding failure.
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let bytes = std::fs::read(path)?;
        if is_json_path(path) {
            let text = String::from_utf8_lossy(&bytes);
            Self::from_json(&text)
        } else {
            Self::from_bytes(&bytes)
        }
    }

    fn check_version(&self) -> Result<(), TraceError> {
        if self.metadata.is_compatible() {
            Ok(())
        } else {
            Err(TraceError::IncompatibleVersion {
                expected: SCHEDULE_SCHEMA_VERSION,
                found: self.metadata.version,
            })
        }
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Errors that can occur when encoding, decoding or storing a trace.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding failed.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Reading or writing the trace file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Version mismatch.
    #[error("incompatible trace version: expected {expected}, found {found}")]
    IncompatibleVersion {
        /// Expected schema version.
        expected: u32,
        /// Found schema version.
        found: u32,
    },
}
