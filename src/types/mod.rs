pub mod trading;
pub mod candle;
pub mod signal;
pub mod position;

pub use trading::*;
pub use candle::*;
pub use signal::*;
pub use position::*;
