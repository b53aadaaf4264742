//! Agent runtime and lead-conversion workflow.
//!
//! The reasoning service proposes tool calls; this crate decides which tools a
//! role may see, executes them against the CRM store, and feeds the results
//! back until the service stops proposing actions or the iteration cap is hit.
//!
//! # Architecture
//!
//! 1. **Tools** (`tools`) - per-role registries and the executor
//! 2. **Runtime** (`runtime`) - the bounded propose/execute loop and decision extraction
//! 3. **Agents** (`agents`) - qualifier, outbound contact and meeting scheduler
//! 4. **Workflow** (`workflow`) - qualify, contact, schedule for one inbound lead
//!
//! The reasoning service never writes to the store directly. Every change goes
//! through a registered tool or through the orchestrator.

pub mod agents;
pub mod conversation;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod tools;
pub mod workflow;

pub use agents::{
    ContactOutcome, MeetingSchedulerAgent, OutboundContactAgent, QualificationOutcome,
    QualifierAgent, SchedulingOutcome,
};
pub use conversation::{ChatMessage, ChatRole, Transcript};
pub use llm::{
    Completion, OpenAiCompatibleClient, ReasoningService, ScriptedReasoningService,
    ServiceCallError, ToolCall,
};
pub use prompts::PromptLibrary;
pub use runtime::{AgentRunResult, AgentRuntime, DecisionSource};
pub use tools::{
    AgentRole, ToolAction, ToolExecutionError, ToolExecutor, ToolRegistry, ToolResult,
    ToolSettings, ToolSpec,
};
pub use workflow::{
    WorkflowError, WorkflowOrchestrator, WorkflowResult, WorkflowSettings, WorkflowStatus,
};
