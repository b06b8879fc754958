pub mod client;
pub mod mock;
pub mod retry;
pub mod sse;

pub use client::{RuntimeClient, RuntimeClientConfig};
pub use mock::{MockConnect, MockEventSource, MockFeed};
pub use retry::{RetryPolicy, RetrySchedule};
pub use sse::FrameStream;
