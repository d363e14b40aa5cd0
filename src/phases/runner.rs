// src/phases/runner.rs
//
// A small workflow engine: phases are declared once, in order, and run
// in that order. The first failure stops the run and names the phase
// that failed; everything after it stays Pending.

use crate::utils::logging::Logger;
use std::collections::HashMap;

pub type PhaseFn<D> = fn(&mut D) -> Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub enum PhaseError {
    UnknownInheritFlag { phase: String, flag: String },
    DuplicatePhase(String),
    UnknownPhase(String),
    Failed { phase: String, message: String },
}

impl std::fmt::Display for PhaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownInheritFlag { phase, flag } => {
                write!(f, "phase {:?} inherits unknown flag {:?}", phase, flag)
            }
            Self::DuplicatePhase(name) => write!(f, "phase {:?} declared twice", name),
            Self::UnknownPhase(name) => write!(f, "no phase named {:?}", name),
            Self::Failed { phase, message } => write!(f, "phase {:?} failed: {}", phase, message),
        }
    }
}

impl std::error::Error for PhaseError {}

pub struct Phase<D> {
    pub name: &'static str,
    pub description: &'static str,
    /// Command line flags this phase reads when run standalone. Checked
    /// against the workflow's known flags when the phase is appended.
    pub inherit_flags: &'static [&'static str],
    pub run: Option<PhaseFn<D>>,
    /// Selecting this phase by name runs all of its siblings too.
    pub run_all_siblings: bool,
    pub children: Vec<Phase<D>>,
}

impl<D> Phase<D> {
    pub fn new(name: &'static str, description: &'static str, run: PhaseFn<D>) -> Self {
        Phase {
            name,
            description,
            inherit_flags: &[],
            run: Some(run),
            run_all_siblings: false,
            children: Vec::new(),
        }
    }

    pub fn container(name: &'static str, description: &'static str, children: Vec<Phase<D>>) -> Self {
        Phase {
            name,
            description,
            inherit_flags: &[],
            run: None,
            run_all_siblings: false,
            children,
        }
    }

    pub fn with_inherit_flags(mut self, flags: &'static [&'static str]) -> Self {
        self.inherit_flags = flags;
        self
    }

    pub fn with_run_all_siblings(mut self) -> Self {
        self.run_all_siblings = true;
        self
    }
}

pub struct Runner<D> {
    phases: Vec<Phase<D>>,
    known_flags: Vec<&'static str>,
    statuses: HashMap<String, PhaseStatus>,
}

impl<D> Runner<D> {
    pub fn new(known_flags: &'static [&'static str]) -> Self {
        Runner {
            phases: Vec::new(),
            known_flags: known_flags.to_vec(),
            statuses: HashMap::new(),
        }
    }

    /// Adds a phase tree. Inherit flags and name collisions are checked
    /// here so a bad workflow fails before anything runs.
    pub fn append(&mut self, phase: Phase<D>) -> Result<(), PhaseError> {
        self.validate(&phase)?;
        self.phases.push(phase);
        Ok(())
    }

    fn validate(&mut self, phase: &Phase<D>) -> Result<(), PhaseError> {
        for flag in phase.inherit_flags {
            if !self.known_flags.contains(flag) {
                return Err(PhaseError::UnknownInheritFlag {
                    phase: phase.name.to_string(),
                    flag: flag.to_string(),
                });
            }
        }
        if self
            .statuses
            .insert(phase.name.to_string(), PhaseStatus::Pending)
            .is_some()
        {
            return Err(PhaseError::DuplicatePhase(phase.name.to_string()));
        }
        for child in &phase.children {
            self.validate(child)?;
        }
        Ok(())
    }

    pub fn status(&self, name: &str) -> Option<PhaseStatus> {
        self.statuses.get(name).copied()
    }

    pub fn run_all(&mut self, data: &mut D, logger: &mut dyn Logger) -> Result<(), PhaseError> {
        let phases = std::mem::take(&mut self.phases);
        let result = phases
            .iter()
            .try_for_each(|phase| Self::execute(&mut self.statuses, phase, data, logger));
        self.phases = phases;
        result
    }

    /// Runs a single phase subtree by name, searching the whole tree. A
    /// target marked run_all_siblings expands to its parent's full child
    /// list, in declaration order.
    pub fn run_one(&mut self, name: &str, data: &mut D, logger: &mut dyn Logger) -> Result<(), PhaseError> {
        let phases = std::mem::take(&mut self.phases);
        let result = match Self::select(&phases, name) {
            Some(selected) => selected
                .iter()
                .try_for_each(|phase| Self::execute(&mut self.statuses, phase, data, logger)),
            None => Err(PhaseError::UnknownPhase(name.to_string())),
        };
        self.phases = phases;
        result
    }

    fn select<'a>(phases: &'a [Phase<D>], name: &str) -> Option<Vec<&'a Phase<D>>> {
        for phase in phases {
            if phase.name == name {
                if phase.run_all_siblings {
                    return Some(phases.iter().collect());
                }
                return Some(vec![phase]);
            }
            if let Some(found) = Self::select(&phase.children, name) {
                return Some(found);
            }
        }
        None
    }

    fn execute(
        statuses: &mut HashMap<String, PhaseStatus>,
        phase: &Phase<D>,
        data: &mut D,
        logger: &mut dyn Logger,
    ) -> Result<(), PhaseError> {
        statuses.insert(phase.name.to_string(), PhaseStatus::Running);
        logger.debug_log(&format!("[phase] {}: {}", phase.name, phase.description));

        if let Some(run) = phase.run {
            if let Err(error) = run(data) {
                statuses.insert(phase.name.to_string(), PhaseStatus::Failed);
                return Err(PhaseError::Failed {
                    phase: phase.name.to_string(),
                    message: error.to_string(),
                });
            }
        }
        for child in &phase.children {
            if let Err(error) = Self::execute(statuses, child, data, logger) {
                statuses.insert(phase.name.to_string(), PhaseStatus::Failed);
                return Err(error);
            }
        }

        statuses.insert(phase.name.to_string(), PhaseStatus::Succeeded);
        Ok(())
    }
}
