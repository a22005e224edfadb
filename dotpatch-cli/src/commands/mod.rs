pub mod common;
pub mod methods;
pub mod patch;
pub mod types;
