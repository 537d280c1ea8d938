//! Lead console real-time sync library.
//!
//! The CRUD screens of the console read and write through a request/response
//! API; this crate owns the one piece that does not: reacting to server push
//! events by invalidating cached query results and surfacing toasts.
//!
//! # Architecture
//!
//! - `realtime`: the dedup / invalidation engine and its ports
//! - `init_tracing`: logging bootstrap for binaries

pub mod realtime;

/// Install the global `tracing` subscriber. `RUST_LOG` wins when set.
/// Only binaries call this; the library itself never installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("leadsync_lib=debug,replay=debug,info")
            }),
        )
        .try_init();
}
