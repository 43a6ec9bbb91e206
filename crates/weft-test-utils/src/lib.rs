//! Shared mocks and fixtures for Weft tests.

pub mod council;
pub mod fixtures;
pub mod inbox;

pub use council::MockCouncil;
pub use fixtures::*;
pub use inbox::{completed_status, failed_status, pending_status, MockInbox};
