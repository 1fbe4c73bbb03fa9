pub mod assertions;
pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use assertions::{assert_occupancy_matches, next_event, next_event_of};
#[allow(unused_imports)]
pub use mocks::{FaultyRoomRepository, MockConnectionManager};
#[allow(unused_imports)]
pub use setup::{TestSetup, TestSetupBuilder};
