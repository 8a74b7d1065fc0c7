//! Runtime adapters: executors for started-callbacks and the refresh timer.

pub mod inline;
#[cfg(feature = "tokio-runtime")]
pub mod refresh;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_spawner;

pub use inline::InlineSpawner;
#[cfg(feature = "tokio-runtime")]
pub use refresh::{spawn_refresh_loop, RefreshHandle};
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioSpawner;
