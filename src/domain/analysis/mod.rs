pub mod correlation;
pub mod risk;
pub mod technical;
