pub mod act;
pub mod cycle;
pub mod params;
pub mod report;
pub mod response;

pub use act::*;
pub use cycle::*;
pub use params::*;
pub use report::*;
pub use response::*;
