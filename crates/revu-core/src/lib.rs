pub mod errors;
pub mod ids;
pub mod runtime;
pub mod source;
pub mod state;
pub mod stream;
pub mod transform;

pub use errors::{BroadcastError, ConnectionError, DecodeError};
pub use runtime::RuntimeEvent;
pub use source::{EventSource, RuntimeEventStream};
pub use state::ConnectionState;
pub use stream::StreamEvent;
pub use transform::transform;
