pub mod compile;
pub mod health;
