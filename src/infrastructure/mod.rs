pub mod cache;
pub mod circuit_breaker;
pub mod exporter;
pub mod observability;
pub mod persistence;
pub mod provider;
