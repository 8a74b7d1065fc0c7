//! Core scheduling abstractions and capacity accounting.

pub mod audit;
pub mod disabled;
pub mod error;
pub mod executor;
pub mod group_id;
pub mod info;
pub mod manager;
pub mod query;
pub mod selection;
pub mod template;

mod group;
mod policy;
mod scheduler;
mod tree;

pub use audit::{AdmissionAction, AdmissionEvent, AuditSink, InMemoryAuditSink, build_admission_event};
pub use disabled::DisabledResourceGroupManager;
pub use error::{AppResult, SchedulerError};
pub use executor::{BoxTask, Spawn, boxed};
pub use group_id::ResourceGroupId;
pub use info::{ResourceGroupInfo, ResourceGroupState};
pub use manager::{ActiveResourceGroupManager, ResourceGroupManager, Selection};
pub use query::{QueryHandle, QueryLifecycle, QueryOutcome, QueryState, ResourceEstimate, RunningQuery};
pub use selection::{SelectionContext, SelectionCriteria, SelectionEngine};
pub use template::{CompiledTemplate, GroupSpec, TemplateForest};

pub(crate) use scheduler::Scheduler;
