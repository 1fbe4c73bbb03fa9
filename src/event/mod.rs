// Lifecycle events
//
// Envelopes are published on a cache pub/sub channel and fanned out to
// in-process handlers by the dispatcher.

// Public API - what other modules can use
pub use bus::{EventBus, EventStream};
pub use dispatcher::EventDispatcher;
pub use events::{EventType, GameEvent};
pub use handler::{EventError, EventHandler};

// Internal modules
mod bus;
mod dispatcher;
mod events;
mod handler;
