pub mod chat;
pub mod content_filter;
pub mod rate_limit;
pub mod signaling;

pub use chat::{ChatConnection, ChatOutcome, ChatRegistry};
pub use content_filter::{ContentFilter, ContentFilterError};
pub use rate_limit::{RateLimitError, SlidingWindowLimiter};
pub use signaling::SignalingRegistry;
