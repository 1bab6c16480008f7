//! Post-load requirements checking
//!
//! Once modules are loaded, each can declare runtime readiness conditions
//! (free space, network, privileges, ...). A [`RequirementsChecker`] checks
//! them and reports through a fixed contract:
//!
//! 1. zero or more `Progress` messages
//! 2. exactly one `Result` carrying every entry
//! 3. exactly one `Complete` verdict
//!
//! The [`RequirementsCoordinator`] only starts a checker and relays its
//! events in order. It does not evaluate requirements itself.

use std::fmt;
use std::sync::mpsc::{self, Sender};
use tracing::{debug, info, warn};

use crate::module::Module;

/// One readiness condition and whether it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementEntry {
    /// Short identifier (e.g. binary name, path, "root")
    pub name: String,

    /// Whether the condition currently holds
    pub satisfied: bool,

    /// Unsatisfied mandatory entries block installation; others only warn
    pub mandatory: bool,

    /// Human-readable explanation
    pub detail: String,
}

impl RequirementEntry {
    /// Create a mandatory entry
    pub fn new(name: impl Into<String>, satisfied: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            satisfied,
            mandatory: true,
            detail: detail.into(),
        }
    }

    /// Downgrade to a warning-only entry
    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    /// An unsatisfied mandatory entry
    pub fn is_blocking(&self) -> bool {
        self.mandatory && !self.satisfied
    }
}

impl fmt::Display for RequirementEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match (self.satisfied, self.mandatory) {
            (true, _) => "ok",
            (false, true) => "FAILED",
            (false, false) => "warning",
        };
        write!(f, "[{}] {}: {}", mark, self.name, self.detail)
    }
}

/// True when no mandatory entry is unsatisfied.
pub fn all_mandatory_satisfied(entries: &[RequirementEntry]) -> bool {
    !entries.iter().any(RequirementEntry::is_blocking)
}

/// Events emitted by a requirements checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementsEvent {
    /// Status message, may repeat
    Progress(String),
    /// Every checked entry
    Result(Vec<RequirementEntry>),
    /// Final verdict
    Complete(bool),
}

/// Checks the requirements of loaded modules.
pub trait RequirementsChecker {
    /// Check `modules` (in load order) and report on `events`.
    fn run(&mut self, modules: &[&dyn Module], events: &Sender<RequirementsEvent>);
}

/// Checker that asks each module for its own entries.
#[derive(Debug, Default)]
pub struct ModuleRequirementsChecker;

impl RequirementsChecker for ModuleRequirementsChecker {
    fn run(&mut self, modules: &[&dyn Module], events: &Sender<RequirementsEvent>) {
        let mut entries = Vec::new();

        for module in modules {
            // A dropped receiver only means nobody is listening
            let _ = events.send(RequirementsEvent::Progress(format!(
                "Checking requirements of {}",
                module.instance_key()
            )));
            entries.extend(module.check_requirements());
        }

        let complete = all_mandatory_satisfied(&entries);
        let _ = events.send(RequirementsEvent::Result(entries));
        let _ = events.send(RequirementsEvent::Complete(complete));
    }
}

/// Starts a checker once and relays its events outward.
#[derive(Debug)]
pub struct RequirementsCoordinator<C: RequirementsChecker> {
    checker: C,
}

impl Default for RequirementsCoordinator<ModuleRequirementsChecker> {
    fn default() -> Self {
        Self::new(ModuleRequirementsChecker)
    }
}

impl<C: RequirementsChecker> RequirementsCoordinator<C> {
    pub fn new(checker: C) -> Self {
        Self { checker }
    }

    /// Run the checker over `modules`, passing each event to `forward`.
    ///
    /// Returns the completion verdict that was relayed. A checker that never
    /// completes is reported as `Complete(false)`.
    pub fn check<F>(&mut self, modules: &[&dyn Module], mut forward: F) -> bool
    where
        F: FnMut(RequirementsEvent),
    {
        let (tx, rx) = mpsc::channel();
        debug!("Starting requirements check over {} module(s)", modules.len());
        self.checker.run(modules, &tx);
        drop(tx);

        let mut results = 0usize;
        let mut verdict: Option<bool> = None;

        for event in rx.iter() {
            if verdict.is_some() {
                warn!("Dropping requirements event after completion: {:?}", event);
                continue;
            }
            match &event {
                RequirementsEvent::Progress(message) => debug!("Requirements: {}", message),
                RequirementsEvent::Result(_) => {
                    results += 1;
                    if results > 1 {
                        warn!("Requirements checker reported more than one result");
                    }
                }
                RequirementsEvent::Complete(ok) => verdict = Some(*ok),
            }
            forward(event);
        }

        if results == 0 {
            warn!("Requirements checker completed without reporting a result");
        }

        match verdict {
            Some(ok) => {
                info!("Requirements check complete: satisfied={}", ok);
                ok
            }
            None => {
                warn!("Requirements checker finished without a verdict, reporting failure");
                forward(RequirementsEvent::Complete(false));
                false
            }
        }
    }
}
