pub mod alerts;
pub mod analysis;
pub mod decision;
pub mod errors;
pub mod orders;
pub mod ports;
pub mod types;
