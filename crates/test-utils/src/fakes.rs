//! Scripted stand-ins for the executor, analyzer and decision surface.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;
use workdag::checkpoint::{Checkpoint, DecisionSurface, HumanDecision};
use workdag::dag::Task;
use workdag::errors::{Result, WorkdagError};
use workdag::exec::{ErrorClass, ExecutionContext, ExecutionFailure, ExecutionReport, WorkExecutor};
use workdag::recovery::{Advice, AdvisoryAnalyzer, RecoveryAttempt};

/// One recorded call to [`ScriptedExecutor::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorCall {
    pub task_id: String,
    pub attempt: u32,
    pub hint: Option<String>,
}

enum Step {
    Report(ExecutionReport),
    Broken(String),
}

/// An executor that:
/// - plays back a per-task queue of reports (or executor errors)
/// - falls back to a per-task sticky report once the queue is empty
/// - otherwise succeeds at the task's estimated cost
/// - records every call, with the attempt number and analyzer hint.
#[derive(Default)]
pub struct ScriptedExecutor {
    queues: Mutex<HashMap<String, VecDeque<Step>>>,
    fallback: Mutex<HashMap<String, ExecutionReport>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<ExecutorCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue reports for `task_id`, consumed one per execution.
    pub fn script(&self, task_id: &str, reports: impl IntoIterator<Item = ExecutionReport>) {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(task_id.to_string()).or_default();
        queue.extend(reports.into_iter().map(Step::Report));
    }

    /// Queue an executor-level error (not a failed report) for `task_id`.
    pub fn break_once(&self, task_id: &str, message: &str) {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(task_id.to_string()).or_default();
        queue.push_back(Step::Broken(message.to_string()));
    }

    /// Every execution of `task_id` fails with `class` once its queue is empty.
    pub fn always_fail(&self, task_id: &str, class: ErrorClass, message: &str) {
        self.fallback.lock().unwrap().insert(
            task_id.to_string(),
            ExecutionReport::failed(class, message, 0.0),
        );
    }

    /// Sleep before answering for `task_id`.
    pub fn delay(&self, task_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(task_id.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn executions_of(&self, task_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task_id == task_id)
            .count()
    }

    /// Task ids in the order they were first executed.
    pub fn execution_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for call in self.calls.lock().unwrap().iter() {
            if !order.contains(&call.task_id) {
                order.push(call.task_id.clone());
            }
        }
        order
    }

    fn next_step(&self, task: &Task) -> Step {
        if let Some(step) = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&task.id)
            .and_then(VecDeque::pop_front)
        {
            return step;
        }
        match self.fallback.lock().unwrap().get(&task.id) {
            Some(report) => Step::Report(report.clone()),
            None => Step::Report(ExecutionReport::succeeded(task.estimated_cost)),
        }
    }
}

impl WorkExecutor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionReport>> + Send + 'a>> {
        Box::pin(async move {
            debug!(task = %task.id, attempt = ctx.attempt, hint = ?ctx.hint, "scripted execution");
            self.calls.lock().unwrap().push(ExecutorCall {
                task_id: task.id.clone(),
                attempt: ctx.attempt,
                hint: ctx.hint.clone(),
            });
            let delay = self.delays.lock().unwrap().get(&task.id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match self.next_step(task) {
                Step::Report(report) => Ok(report),
                Step::Broken(message) => Err(WorkdagError::Other(anyhow::anyhow!(message))),
            }
        })
    }
}

enum Analysis {
    Advice(Advice),
    Fail(String),
    Hang,
}

/// An analyzer that plays back a queue of answers and escalates once the
/// queue is empty.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    answers: Mutex<VecDeque<Analysis>>,
    consulted: AtomicUsize,
    seen: Mutex<Vec<(String, usize)>>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advise(&self, advice: Advice) {
        self.answers.lock().unwrap().push_back(Analysis::Advice(advice));
    }

    pub fn fail(&self, message: &str) {
        self.answers
            .lock()
            .unwrap()
            .push_back(Analysis::Fail(message.to_string()));
    }

    /// Never answer; exercises the analyzer timeout.
    pub fn hang(&self) {
        self.answers.lock().unwrap().push_back(Analysis::Hang);
    }

    pub fn consulted(&self) -> usize {
        self.consulted.load(Ordering::SeqCst)
    }

    /// `(failure message, ledger length)` for every consultation.
    pub fn seen(&self) -> Vec<(String, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

impl AdvisoryAnalyzer for ScriptedAnalyzer {
    fn analyze<'a>(
        &'a self,
        _task: &'a Task,
        failure: &'a ExecutionFailure,
        attempts: &'a [RecoveryAttempt],
    ) -> Pin<Box<dyn Future<Output = Result<Advice>> + Send + 'a>> {
        Box::pin(async move {
            self.consulted.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((failure.message.clone(), attempts.len()));
            let next = self.answers.lock().unwrap().pop_front();
            match next {
                Some(Analysis::Advice(advice)) => Ok(advice),
                Some(Analysis::Fail(message)) => {
                    Err(WorkdagError::Other(anyhow::anyhow!(message)))
                }
                Some(Analysis::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!("pending never resolves")
                }
                None => Ok(Advice::escalate("nothing scripted")),
            }
        })
    }
}

/// A decision surface that always answers with the same option and keeps
/// every checkpoint it was shown.
pub struct FixedSurface {
    option: Mutex<String>,
    shown: Mutex<Vec<Checkpoint>>,
}

impl FixedSurface {
    pub fn new(option: &str) -> Arc<Self> {
        Arc::new(Self {
            option: Mutex::new(option.to_string()),
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn answer_with(&self, option: &str) {
        *self.option.lock().unwrap() = option.to_string();
    }

    pub fn prompts(&self) -> usize {
        self.shown.lock().unwrap().len()
    }

    pub fn shown(&self) -> Vec<Checkpoint> {
        self.shown.lock().unwrap().clone()
    }
}

impl DecisionSurface for FixedSurface {
    fn decide(&self, checkpoint: &Checkpoint) -> Result<HumanDecision> {
        self.shown.lock().unwrap().push(checkpoint.clone());
        Ok(HumanDecision::new(self.option.lock().unwrap().clone()))
    }
}
