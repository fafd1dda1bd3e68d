//! Core data types: time handling and the cached segment kinds

pub mod helicorder;
pub mod rsam;
pub mod segment;
pub mod time;
pub mod wave;

pub use helicorder::*;
pub use rsam::*;
pub use segment::*;
pub use time::*;
pub use wave::*;
