pub mod configuration;
pub mod decision;
pub mod metrics;
pub mod params;

pub use configuration::*;
pub use decision::*;
pub use metrics::*;
pub use params::{ParamSection, ParamTree};
