//! Executor abstraction used to dispatch started-callbacks.

use std::future::Future;
use std::pin::Pin;

/// Boxed unit of work handed to an executor.
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Abstraction for running dispatched work on a runtime.
///
/// The scheduler never waits on the spawned task; it only hands it over after
/// releasing its own locks.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_resource_groups::core::{BoxTask, Spawn};
///
/// struct ThreadSpawner;
///
/// impl Spawn for ThreadSpawner {
///     fn spawn(&self, task: BoxTask) {
///         std::thread::spawn(move || futures::executor::block_on(task));
///     }
/// }
/// ```
pub trait Spawn: Send + Sync {
    /// Spawn a task; must not block on its completion.
    fn spawn(&self, task: BoxTask);
}

/// Box a future into a [`BoxTask`].
pub fn boxed<F>(fut: F) -> BoxTask
where
    F: Future<Output = ()> + Send + 'static,
{
    Box::pin(fut)
}
