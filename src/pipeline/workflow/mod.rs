//! Step-graph workflow engine.
//!
//! A workflow is a set of named async steps over one state record,
//! wired with direct, loop and conditional transitions. Steps never return
//! errors; they fill the state's error slot and the graph routes on it.
//! Only an unroutable label (or a malformed run) aborts with
//! [`WorkflowError`].

pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod state;

pub use checkpoint::{Checkpoint, Checkpointer, InMemoryCheckpointer};
pub use error::WorkflowError;
pub use graph::{CompiledWorkflow, ExecutionConfig, Step, WorkflowBuilder};
pub use state::{ErrorKind, RunMeta, StepState, WorkflowFailure};
