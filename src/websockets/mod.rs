// Public API
pub use connection_manager::{ClientHandle, ConnectionManager};
pub use event_forwarder::HubEventForwarder;
pub use handler::{websocket_handler, FrameHandler};
pub use hub::ConnectionHub;
pub use messages::{ClientFrame, ClientFrameType, ServerFrame};
pub use socket::{Connection, FrameReader, FrameWriter, MessageHandler, SocketError};

// Internal modules
mod connection_manager;
mod event_forwarder;
mod handler;
mod hub;
mod messages;
mod socket;
