pub mod api;
pub mod cleanup;
pub mod eligibility;
pub mod lifecycle;
pub mod registry;

pub use api::*;
pub use cleanup::*;
pub use eligibility::*;
pub use lifecycle::*;
pub use registry::*;
