// src/dag/mod.rs

//! Task graph and per-run scheduling state.
//!
//! - [`graph`] holds the dependency graph: ready frontier, cycle detection,
//!   transitive dependents.
//! - [`task_info`] defines task records and the stage FSM.
//! - [`run_context`] is the explicit per-run state (budget, completed and
//!   blocked sets, checkpoint counter).
//! - [`scheduler`] owns graph + tasks + context and applies transitions.
//! - [`scheduler_step`] defines the result type for scheduler updates.

pub mod graph;
pub mod run_context;
pub mod scheduler;
pub mod scheduler_step;
pub mod task_info;

pub use graph::DependencyGraph;
pub use run_context::{AutoDecision, AutoResolution, RunContext};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{BlockReason, Stage, Task};
