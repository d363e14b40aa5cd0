// src/phases/mod.rs

pub mod init;
pub mod join;
pub mod runner;
pub mod token;

pub use runner::{Phase, PhaseError, PhaseStatus, Runner};
