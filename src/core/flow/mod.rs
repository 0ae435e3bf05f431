//! Automation flow engine: templates, executions and the step loop that drives them.

pub mod audit;
pub mod clinic;
pub mod context;
pub mod dispatcher;
pub mod duration;
pub mod executor;
pub mod handlers;
pub mod state;
pub mod store;
pub mod targets;
pub mod template;

pub use dispatcher::{HandlerRegistry, HandlerRegistryBuilder, NodeContext, NodeHandler, NodeOutcome};
pub use executor::{FlowEngine, RunOptions};
pub use state::{
    Execution, ExecutionLogEntry, ExecutionStatus, LogStatus, ResumeMode, Trigger, WaitKind,
    WaitingMeta,
};
pub use targets::{resolve_targets, RuntimeTargets, TargetKind, TARGET_ALIAS_TABLE_VERSION};
pub use template::{Node, NodeKind, TemplateVersion};
