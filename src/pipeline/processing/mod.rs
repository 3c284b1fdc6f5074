pub mod analytics;
pub mod enrich;
pub mod quality_gate;
