pub mod broadcaster;
pub mod server;
pub mod shutdown;
pub mod subscriber;
pub mod wire;

pub use broadcaster::{Broadcaster, BroadcasterConfig};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use subscriber::Subscription;
