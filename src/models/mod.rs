pub mod execution;
pub mod report;
pub mod time;

pub use execution::*;
pub use report::*;
pub use time::*;
