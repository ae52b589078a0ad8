//! Agent module - LLM client, article evaluator and prompt refiner

pub mod evaluator;
pub mod llm;
pub mod refiner;
