/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Epoch-aligned recurring task scheduling.
//!
//! A task with an interval of `k` epochs is *due* exactly in the epochs whose index is a multiple of `k`.
//! Due-ness therefore depends only on the epoch index, never on a keeper's history, so every keeper agrees
//! on which epochs are "task epochs". Only the current leader actually executes a due task.
//!
//! The keeper usually ticks more often than epochs advance, so [`TaskScheduler`] also remembers the epoch
//! in which each task last ran ([`TaskRunState`]) and will not run a task twice in the same epoch. This
//! memory is created lazily per task name and wiped by [`clear`](TaskScheduler::clear) when leadership is
//! lost.

use std::collections::HashMap;

use crate::types::{data_types::EpochIndex, task::TaskDefinition};

/// Whether `task` is due in `epoch`. Pure: re-evaluating the same epoch always gives the same answer.
pub fn is_due(task: &TaskDefinition, epoch: EpochIndex) -> bool {
    task.interval_epochs > 0 && epoch.is_multiple_of(task.interval_epochs)
}

/// Per-task run memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskRunState {
    pub last_run_epoch: EpochIndex,
}

#[derive(Debug, Default)]
pub struct TaskScheduler {
    runs: HashMap<String, TaskRunState>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            runs: HashMap::new(),
        }
    }

    /// Whether `task` should be executed in `epoch` by a leader: it is active, due, and has not already run
    /// in this epoch.
    pub fn should_run(&self, task: &TaskDefinition, epoch: EpochIndex) -> bool {
        task.active
            && is_due(task, epoch)
            && self
                .runs
                .get(&task.name)
                .map_or(true, |run| run.last_run_epoch != epoch)
    }

    /// Record that the task named `task_name` was executed in `epoch`.
    pub fn mark_run(&mut self, task_name: &str, epoch: EpochIndex) {
        self.runs.insert(
            task_name.to_string(),
            TaskRunState {
                last_run_epoch: epoch,
            },
        );
    }

    pub fn run_state(&self, task_name: &str) -> Option<&TaskRunState> {
        self.runs.get(task_name)
    }

    /// Forget every task's run memory.
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
