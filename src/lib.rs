pub mod cluster;
pub mod error;
pub mod ilp;
pub mod ini;
pub mod layout;
pub mod persist;
pub mod units;

pub use error::{LayoutError, Result};

#[cfg(test)]
mod test;
