use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::model::ConfigFile;
use crate::dag::graph::DependencyGraph;
use crate::dag::run_context::RunContext;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::task_info::{BlockReason, Stage, Task};
use crate::errors::{Result, WorkdagError};
use crate::types::TaskId;

/// Scheduler holds the immutable dependency graph plus the mutable task
/// records and [`RunContext`] of a single run.
///
/// It is responsible for:
/// - rejecting cyclic or dangling batches at submission time
/// - promoting tasks to `READY` once their dependencies are `DONE`
/// - choosing the next task (priority tier, then cheapest first)
/// - folding outcomes back into the completed/blocked sets
/// - cascading blocks to every transitive dependent
///
/// It performs no IO; the async runner in [`crate::engine`] drives it.
#[derive(Debug)]
pub struct Scheduler {
    graph: DependencyGraph,
    tasks: BTreeMap<TaskId, Task>,
    ctx: RunContext,
}

impl Scheduler {
    /// Submit a batch of tasks for a new or resumed run.
    ///
    /// Fails closed: a batch containing a cycle is rejected outright with the
    /// cycle path, never partially scheduled. The completed/blocked sets in
    /// `ctx` are rebuilt from the task stages so the two can never disagree.
    pub fn submit(mut ctx: RunContext, tasks: Vec<Task>) -> Result<Self> {
        let graph = DependencyGraph::from_tasks(&tasks)?;
        if let Some(cycle) = graph.detect_cycle() {
            warn!(run_id = %ctx.run_id, ?cycle, "rejecting batch: dependency cycle");
            return Err(WorkdagError::DagCycle(cycle));
        }

        ctx.completed = tasks
            .iter()
            .filter(|t| t.stage() == Stage::Done)
            .map(|t| t.id.clone())
            .collect();
        ctx.blocked = tasks
            .iter()
            .filter(|t| t.stage() == Stage::Blocked)
            .map(|t| t.id.clone())
            .collect();

        let tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        debug!(run_id = %ctx.run_id, "scheduler: batch accepted");
        Ok(Self { graph, tasks, ctx })
    }

    /// Build a fresh run from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile, run_id: impl Into<String>) -> Result<Self> {
        let ctx = RunContext::new(run_id, cfg.run.budget, cfg.run.max_checkpoints);
        let tasks = cfg
            .task
            .iter()
            .map(|(id, tc)| Task::from_config(id.clone(), tc))
            .collect();
        Self::submit(ctx, tasks)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.ctx
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Owned copy of all task records, for persistence.
    pub fn snapshot_tasks(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    pub fn stage_of(&self, id: &str) -> Option<Stage> {
        self.tasks.get(id).map(|t| t.stage())
    }

    /// Recompute the ready frontier, promoting `BACKLOG` tasks to `READY`.
    ///
    /// Returns every task currently eligible to run, sorted by id.
    pub fn refresh_ready(&mut self) -> Vec<TaskId> {
        let eligible = self.graph.ready_set(&self.ctx.completed, &self.ctx.blocked);
        let mut ready = Vec::new();

        for id in eligible {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            match task.stage() {
                Stage::Backlog => {
                    if task.mark_ready().is_ok() {
                        debug!(task = %id, "dependencies done; marking READY");
                        ready.push(id);
                    }
                }
                Stage::Ready => ready.push(id),
                // In flight or terminal: not eligible for selection.
                Stage::InProgress | Stage::Done | Stage::Blocked => {}
            }
        }

        ready
    }

    /// Pick the next task to run: priority tier first, then cheapest
    /// estimated cost, then task id.
    pub fn select_next(&mut self) -> Option<TaskId> {
        let ready = self.refresh_ready();
        ready
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .min_by(|a, b| selection_order(a, b))
            .map(|t| t.id.clone())
    }

    /// `READY -> IN_PROGRESS`.
    pub fn start(&mut self, id: &str) -> Result<()> {
        let task = self.task_mut(id)?;
        task.start()?;
        info!(task = %id, "task IN_PROGRESS");
        Ok(())
    }

    pub fn set_retry_count(&mut self, id: &str, retries: u32) -> Result<()> {
        self.task_mut(id)?.set_retry_count(retries);
        Ok(())
    }

    /// Fold a successful execution into the run.
    pub fn record_success(&mut self, id: &str, cost: f64) -> Result<SchedulerStep> {
        self.task_mut(id)?.complete()?;
        self.ctx.completed.insert(id.to_string());
        self.ctx.add_cost(cost);
        info!(
            task = %id,
            cost,
            running_cost = self.ctx.running_cost,
            "task DONE"
        );

        let before: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.stage() == Stage::Ready)
            .map(|t| t.id.clone())
            .collect();
        let newly_ready = self
            .refresh_ready()
            .into_iter()
            .filter(|t| !before.contains(t))
            .collect();

        Ok(SchedulerStep {
            newly_ready,
            newly_blocked: Vec::new(),
            budget_exhausted: self.ctx.budget_exhausted(),
        })
    }

    /// Fold a failed execution into the run: block the task, cascade to its
    /// dependents and account for what the attempts cost.
    pub fn record_failure(
        &mut self,
        id: &str,
        reason: BlockReason,
        cost: f64,
    ) -> Result<SchedulerStep> {
        self.ctx.add_cost(cost);
        let mut step = self.block(id, reason)?;
        step.budget_exhausted = self.ctx.budget_exhausted();
        Ok(step)
    }

    /// Block a task that never ran (or failed) and cascade to its dependents.
    pub fn block(&mut self, id: &str, reason: BlockReason) -> Result<SchedulerStep> {
        let task = self.task_mut(id)?;
        warn!(task = %id, reason = %reason, "task BLOCKED");
        task.block(reason)?;
        self.ctx.blocked.insert(id.to_string());

        let mut newly_blocked = vec![id.to_string()];
        newly_blocked.extend(self.cascade_block(id));

        Ok(SchedulerStep {
            newly_ready: Vec::new(),
            newly_blocked,
            budget_exhausted: self.ctx.budget_exhausted(),
        })
    }

    /// `IN_PROGRESS -> READY` for a cancelled execution.
    pub fn interrupt(&mut self, id: &str) -> Result<()> {
        self.task_mut(id)?.interrupt()?;
        info!(task = %id, "task execution interrupted; back to READY");
        Ok(())
    }

    /// Explicit requeue of a blocked task.
    ///
    /// The task and every dependent blocked *because of it* go back to
    /// `BACKLOG`. Dependents that are still behind some other blocked task are
    /// immediately re-blocked citing that task. Returns the ids that remain
    /// requeued.
    pub fn unblock(&mut self, id: &str) -> Result<Vec<TaskId>> {
        self.task_mut(id)?.requeue()?;
        self.ctx.blocked.remove(id);
        let mut requeued = vec![id.to_string()];

        for dependent in self.graph.transitive_dependents(id) {
            let Some(task) = self.tasks.get_mut(&dependent) else {
                continue;
            };
            let cites_root = task
                .blocked_reason()
                .and_then(|r| r.upstream())
                .is_some_and(|up| up == id);
            if task.stage() == Stage::Blocked && cites_root {
                task.requeue()?;
                self.ctx.blocked.remove(&dependent);
                requeued.push(dependent);
            }
        }

        let reblocked = self.reconcile_blocks();
        requeued.retain(|t| !reblocked.contains(t));

        info!(task = %id, ?requeued, "unblocked");
        Ok(requeued)
    }

    /// Put tasks left `IN_PROGRESS` by a crashed run back to `READY`.
    pub fn recover_interrupted(&mut self) -> Vec<TaskId> {
        let mut recovered = Vec::new();
        for task in self.tasks.values_mut() {
            if task.stage() == Stage::InProgress && task.interrupt().is_ok() {
                warn!(task = %task.id, "recovering task left IN_PROGRESS by a previous run");
                recovered.push(task.id.clone());
            }
        }
        recovered
    }

    /// Re-apply cascading from every root block, so no dependent of a blocked
    /// task is left in `BACKLOG`. Returns newly blocked ids.
    pub fn reconcile_blocks(&mut self) -> Vec<TaskId> {
        let roots: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.stage() == Stage::Blocked)
            .filter(|t| t.blocked_reason().and_then(|r| r.upstream()).is_none())
            .map(|t| t.id.clone())
            .collect();

        let mut newly = Vec::new();
        for root in roots {
            newly.extend(self.cascade_block(&root));
        }
        newly
    }

    fn cascade_block(&mut self, upstream: &str) -> Vec<TaskId> {
        let mut newly = Vec::new();
        for dependent in self.graph.transitive_dependents(upstream) {
            let Some(task) = self.tasks.get_mut(&dependent) else {
                continue;
            };
            if task.is_terminal() {
                continue;
            }
            let reason = BlockReason::Transitive {
                upstream: upstream.to_string(),
            };
            if task.block(reason).is_ok() {
                debug!(task = %dependent, upstream, "transitive block");
                self.ctx.blocked.insert(dependent.clone());
                newly.push(dependent);
            }
        }
        newly
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| WorkdagError::TaskNotFound(id.to_string()))
    }
}

fn selection_order(a: &Task, b: &Task) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.estimated_cost.total_cmp(&b.estimated_cost))
        .then_with(|| a.id.cmp(&b.id))
}
