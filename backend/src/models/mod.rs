pub mod feature;
pub mod region;
pub mod statistic;
pub mod time;

pub use feature::*;
pub use region::*;
pub use statistic::*;
pub use time::*;
