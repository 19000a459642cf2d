//! gt - Town orchestrator for fleets of AI coding agents

pub mod agent;
pub mod beads;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod epic;
pub mod error;
pub mod events;
pub mod rig;
pub mod seance;
pub mod subprocess;
pub mod telemetry;
pub mod town;
