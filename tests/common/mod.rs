#![allow(dead_code)]

pub use workdag_test_utils::builders;
pub use workdag_test_utils::fakes;
pub use workdag_test_utils::harness::Harness;
pub use workdag_test_utils::{init_tracing, with_timeout};

use workdag::dag::{RunContext, Task};

/// Fresh context with a generous budget and checkpoint allowance.
pub fn context(run_id: &str) -> RunContext {
    RunContext::new(run_id, 100.0, 3)
}

/// Diamond: A -> {B, C} -> D.
pub fn diamond() -> Vec<Task> {
    vec![
        Task::new("A"),
        Task::new("B").with_dependency("A"),
        Task::new("C").with_dependency("A"),
        Task::new("D").with_dependency("B").with_dependency("C"),
    ]
}
