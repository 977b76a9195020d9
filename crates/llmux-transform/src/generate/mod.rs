//! Generate-content converters, one module per ordered `(inbound, upstream)`
//! pair. A module `a2b` owns three directions of the same conversation:
//! requests a→b, non-stream responses b→a, and stream events b→a.

pub mod helpers;

pub mod claude2gemini;
pub mod claude2openai_chat;
pub mod claude2openai_responses;
pub mod gemini2claude;
pub mod gemini2openai_chat;
pub mod gemini2openai_responses;
pub mod openai_chat2claude;
pub mod openai_chat2gemini;
pub mod openai_chat2openai_responses;
pub mod openai_responses2claude;
pub mod openai_responses2gemini;
pub mod openai_responses2openai_chat;
