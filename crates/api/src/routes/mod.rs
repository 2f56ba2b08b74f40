//! HTTP Routes

pub mod ingest;
