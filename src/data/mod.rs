pub mod cache;
pub mod warehouse;

pub use cache::*;
pub use warehouse::*;
