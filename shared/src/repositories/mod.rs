pub mod strategy_repository;

pub use strategy_repository::{StrategyRepository, StrategyStore};
