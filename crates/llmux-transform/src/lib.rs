//! Protocol translation between the gateway's canonical formats.
//!
//! Converters are organized per ordered pair: the module `a2b` converts
//! requests a→b and translates b's responses and stream events back into a's
//! shapes. The [`registry::TranslatorRegistry`] is built once at startup and
//! is the only lookup path the request pipeline uses.

pub mod generate;
pub mod registry;
pub mod stream;
pub mod tokens;
pub mod types;

pub use registry::{Translator, TranslatorRegistry};
pub use stream::StreamTransformer;
pub use types::{Proto, StreamEvent, StreamFormat, TransformError, stream_format};
