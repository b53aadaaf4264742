pub mod engine;
pub mod states;

pub use engine::{WorkflowTrace, WorkflowTransitionError};
pub use states::{WorkflowState, WorkflowTransition};
