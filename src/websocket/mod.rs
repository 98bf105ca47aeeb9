pub mod handler;
pub mod registry;

pub use handler::ws_handler;
pub use registry::{ConnState, ConnectionHandle, ConnectionRegistry};
