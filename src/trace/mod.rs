//! Recording and persisting the decisions of an iteration.

pub mod schedule;

pub use schedule::{
    ScheduleStep, ScheduleTrace, TraceError, TraceMetadata, SCHEDULE_SCHEMA_VERSION,
};
