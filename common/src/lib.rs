pub mod config;
pub mod errors;
pub mod keys;
pub mod messages;
pub mod models;
pub mod utils;

pub use config::*;
pub use errors::*;
pub use keys::*;
pub use messages::*;
pub use utils::*;
