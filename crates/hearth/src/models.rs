//! These models represent the objects passed around by the agent
//!
//! There are a few different related formats we need to interact with:
//! - messages in the conversation history, owned by the conversation store
//! - incremental deltas streamed back from the inference engine for a single turn
//! - openai-style chat messages/tools, sent from the agent to the engine
//! - tool declarations and calls, exchanged with the tool registry
//!
//! We always immediately convert engine payloads into these internal structs, so the
//! orchestration code never sees a wire format.
pub mod delta;
pub mod message;
pub mod role;
pub mod tool;
