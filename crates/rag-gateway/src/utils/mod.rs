pub mod error;
pub mod limiters;
pub mod similarity;
pub mod token_budget;
