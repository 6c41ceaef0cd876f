mod config;
mod protocol;
mod util;

pub use config::*;
pub use protocol::*;
pub use util::*;
