mod hub;
mod types;

pub use hub::{EventHub, EventSink};
pub use types::{AccessRecord, Event, OperationalEvent, UsageRecord};
