//! Wire DTOs for the protocols the gateway speaks.
//!
//! Each module mirrors one public API surface. The structs keep the fields the
//! gateway actually reads or rewrites; unknown fields are dropped on parse and
//! optionals are skipped on serialize so round-tripped bodies stay minimal.

pub mod claude;
pub mod gemini;
pub mod openai_chat;
pub mod openai_responses;
pub mod sse;
