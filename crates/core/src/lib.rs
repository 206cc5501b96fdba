pub mod error;
pub mod frame;
pub mod hashing;
pub mod token;
pub mod tracker_list;
pub mod utils;

pub use error::{SwarmError, SwarmResult};
