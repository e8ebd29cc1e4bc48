//! # Step capabilities and the dispatch table resolved from them.
//!
//! A controller declares which steps it implements, per variant. The lifecycle
//! resolves that declaration once, at construction, into a [`DispatchTable`]:
//!
//! | step        | cooperative | blocking | resolved to            |
//! |-------------|-------------|----------|------------------------|
//! | initialize  | yes         | any      | `Cooperative`          |
//! | initialize  | no          | yes      | `Blocking`             |
//! | initialize  | no          | no       | `MissingCapability`    |
//! | run_finally | no          | no       | `Absent` (no-op)       |
//! | health      | no          | no       | `Absent` (state-based) |
//!
//! `run_loop` follows the `initialize` rows.

use crate::error::RuntimeError;

/// Which of the four steps one variant implements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepSet {
    pub initialize: bool,
    pub run_loop: bool,
    pub run_finally: bool,
    pub health: bool,
}

impl StepSet {
    /// No steps.
    pub const NONE: StepSet = StepSet {
        initialize: false,
        run_loop: false,
        run_finally: false,
        health: false,
    };

    /// Every step.
    pub const ALL: StepSet = StepSet {
        initialize: true,
        run_loop: true,
        run_finally: true,
        health: true,
    };

    /// `initialize` + `run_loop`.
    pub const CORE: StepSet = StepSet {
        initialize: true,
        run_loop: true,
        run_finally: false,
        health: false,
    };

    pub const fn with_run_finally(mut self) -> Self {
        self.run_finally = true;
        self
    }

    pub const fn with_health(mut self) -> Self {
        self.health = true;
        self
    }
}

/// Steps implemented by a controller, split by variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub cooperative: StepSet,
    pub blocking: StepSet,
}

impl Capabilities {
    /// Only cooperative steps.
    pub const fn cooperative(steps: StepSet) -> Self {
        Self {
            cooperative: steps,
            blocking: StepSet::NONE,
        }
    }

    /// Only blocking steps.
    pub const fn blocking(steps: StepSet) -> Self {
        Self {
            cooperative: StepSet::NONE,
            blocking: steps,
        }
    }
}

/// How a step gets invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    /// Awaited on the scheduler.
    Cooperative,
    /// Offloaded to the worker pool.
    Blocking,
    /// Not implemented.
    Absent,
}

impl Variant {
    fn pick(cooperative: bool, blocking: bool) -> Self {
        match (cooperative, blocking) {
            (true, _) => Variant::Cooperative,
            (false, true) => Variant::Blocking,
            (false, false) => Variant::Absent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Cooperative => "cooperative",
            Variant::Blocking => "blocking",
            Variant::Absent => "absent",
        }
    }
}

/// Resolved variant per step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchTable {
    pub initialize: Variant,
    pub run_loop: Variant,
    pub run_finally: Variant,
    pub health: Variant,
}

impl DispatchTable {
    /// Resolves `caps`, preferring the cooperative variant.
    ///
    /// Fails with [`RuntimeError::MissingCapability`] when `initialize` or
    /// `run_loop` has no variant at all.
    pub fn resolve(caps: Capabilities, controller: &str) -> Result<Self, RuntimeError> {
        let (c, b) = (caps.cooperative, caps.blocking);
        let table = Self {
            initialize: Variant::pick(c.initialize, b.initialize),
            run_loop: Variant::pick(c.run_loop, b.run_loop),
            run_finally: Variant::pick(c.run_finally, b.run_finally),
            health: Variant::pick(c.health, b.health),
        };

        for (step, variant) in [("initialize", table.initialize), ("run_loop", table.run_loop)] {
            if variant == Variant::Absent {
                return Err(RuntimeError::MissingCapability {
                    controller: controller.to_string(),
                    step,
                });
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooperative_wins_when_both_exist() {
        let caps = Capabilities {
            cooperative: StepSet::CORE,
            blocking: StepSet::ALL,
        };
        let table = DispatchTable::resolve(caps, "pid").unwrap();
        assert_eq!(table.initialize, Variant::Cooperative);
        assert_eq!(table.run_loop, Variant::Cooperative);
        assert_eq!(table.run_finally, Variant::Blocking);
        assert_eq!(table.health, Variant::Blocking);
    }

    #[test]
    fn blocking_only_controller_resolves_to_blocking() {
        let table = DispatchTable::resolve(Capabilities::blocking(StepSet::CORE), "relay").unwrap();
        assert_eq!(table.run_loop, Variant::Blocking);
        assert_eq!(table.run_finally, Variant::Absent);
        assert_eq!(table.health, Variant::Absent);
    }

    #[test]
    fn missing_loop_is_rejected() {
        let caps = Capabilities::cooperative(StepSet {
            run_loop: false,
            ..StepSet::ALL
        });
        let err = DispatchTable::resolve(caps, "camera").unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::MissingCapability { step: "run_loop", .. }
        ));
    }

    #[test]
    fn missing_initialize_is_rejected_first() {
        let err = DispatchTable::resolve(Capabilities::default(), "camera").unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::MissingCapability { step: "initialize", .. }
        ));
    }
}
