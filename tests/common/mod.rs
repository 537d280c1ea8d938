// tests/common/mod.rs
//! Recording ports shared by the engine integration tests.

#![allow(dead_code)]

pub mod mock_cache;
pub mod mock_notify;

pub use mock_cache::RecordingCache;
pub use mock_notify::RecordingNotify;
