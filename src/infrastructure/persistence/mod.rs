mod database;
mod decision_store;

pub use database::Database;
pub use decision_store::{DecisionStore, TradeRecord};
