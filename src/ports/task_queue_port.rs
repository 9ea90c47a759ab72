//! Delayed task queue port.

use std::time::Duration;

use crate::domain::error::TradebotError;

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_type: String,
    pub payload: Vec<u8>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Task {
            task_type: task_type.into(),
            payload,
        }
    }
}

pub trait TaskQueue {
    /// Makes `task` available to consumers once `delay` has elapsed.
    fn enqueue(&self, task: Task, delay: Duration) -> Result<(), TradebotError>;
}

/// Consumer side: executes a task delivered by the queue.
pub trait TaskHandler {
    /// Task types handled, matched by prefix.
    fn task_prefix(&self) -> &str;

    fn handle(&self, task: &Task) -> Result<(), TradebotError>;
}
