//! Executor that runs started-callbacks on the dispatching thread.

use crate::core::{BoxTask, Spawn};

/// Runs each task to completion before `spawn` returns.
///
/// Useful for tests and for engines whose `on_started` only hands the token
/// to another thread. A callback that blocks stalls the dispatching caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineSpawner;

impl Spawn for InlineSpawner {
    fn spawn(&self, task: BoxTask) {
        futures::executor::block_on(task);
    }
}
