//! Shared domain models: the crawl request, typed configuration and run status.

pub mod model;
pub mod status;
