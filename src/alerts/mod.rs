/// Alert construction and observer fan-out
pub mod alert;
pub mod registry;

pub use alert::{AlertBuilder, ErrorAlert};
pub use registry::{Observer, ObserverRegistry};
