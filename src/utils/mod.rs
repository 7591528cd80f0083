pub mod fs;
pub mod units;
