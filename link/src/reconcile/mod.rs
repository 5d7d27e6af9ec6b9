//! Stream reconciliation: history pages and live envelopes merged into one
//! ordered, deduplicated view per topic.

mod driver;
mod stream;

pub use driver::{LoadMoreOutcome, TopicStream};
pub use stream::{StreamPhase, StreamSnapshot};
