pub mod weather;
pub mod fields;
pub mod report;
pub mod errors;

pub use weather::*;
pub use fields::*;
pub use report::*;
pub use errors::*;
