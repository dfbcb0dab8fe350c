pub mod client;
pub mod protocol;

/// Default TCP port a node listens on.
pub const DEFAULT_PORT: u16 = 5001;
