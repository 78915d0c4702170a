pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod stream;
pub mod trace;

mod util;
