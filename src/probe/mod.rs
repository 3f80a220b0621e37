pub mod endpoint;
pub mod runner;
pub mod socks5;

pub use endpoint::{Endpoint, InputError};
pub use runner::{run_probe, ProbeOptions, ProbeResult};
