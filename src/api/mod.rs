// =============================================================================
// HTTP API — webhook ingestion + admin query surface
// =============================================================================

pub mod auth;
pub mod rest;
