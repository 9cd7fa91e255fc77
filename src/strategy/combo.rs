//! Prefix/suffix strategy composition.

use super::{SchedulingStrategy, Strategy};
use crate::runtime::{AsyncOperation, OperationId};

/// Runs `prefix` until it reaches its step bound, then hands over to `suffix`.
///
/// A typical pairing is an unfair, systematic prefix (DFS, delay bounding)
/// that explores the start of the program exhaustively, followed by a fair
/// random suffix that drives every iteration to completion.
#[derive(Debug)]
pub struct ComboStrategy {
    prefix: Box<Strategy>,
    suffix: Box<Strategy>,
}

impl ComboStrategy {
    /// Combines two strategies.
    #[must_use]
    pub fn new(prefix: Strategy, suffix: Strategy) -> Self {
        Self {
            prefix: Box::new(prefix),
            suffix: Box::new(suffix),
        }
    }

    fn active(&mut self) -> &mut Strategy {
        if self.prefix.has_reached_max_steps() {
            &mut *self.suffix
        } else {
            &mut *self.prefix
        }
    }
}

impl SchedulingStrategy for ComboStrategy {
    fn get_next(&mut self, current: &AsyncOperation, ops: &[&AsyncOperation]) -> Option<OperationId> {
        self.active().get_next(current, ops)
    }

    fn get_next_boolean_choice(&mut self, current: &AsyncOperation, max_value: u32) -> Option<bool> {
        self.active().get_next_boolean_choice(current, max_value)
    }

    fn get_next_integer_choice(&mut self, current: &AsyncOperation, max_value: u32) -> Option<u32> {
        self.active().get_next_integer_choice(current, max_value)
    }

    fn notify_bug_found(&mut self) {
        self.prefix.notify_bug_found();
        self.suffix.notify_bug_found();
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        let prefix = self.prefix.prepare_for_next_iteration();
        let suffix = self.suffix.prepare_for_next_iteration();
        prefix && suffix
    }

    fn scheduled_steps(&self) -> u64 {
        self.prefix.scheduled_steps() + self.suffix.scheduled_steps()
    }

    fn max_steps(&self) -> u64 {
        match (self.prefix.max_steps(), self.suffix.max_steps()) {
            (_, 0) => 0,
            (prefix, suffix) => prefix + suffix,
        }
    }

    fn has_reached_max_steps(&self) -> bool {
        self.prefix.has_reached_max_steps() && self.suffix.has_reached_max_steps()
    }

    fn divergence(&self) -> Option<&str> {
        self.prefix.divergence().or_else(|| self.suffix.divergence())
    }

    fn is_fair(&self) -> bool {
        self.suffix.is_fair()
    }

    fn description(&self) -> String {
        format!(
            "Combo[{}, {}]",
            self.prefix.description(),
            self.suffix.description()
        )
    }
}
