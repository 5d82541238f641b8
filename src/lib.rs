//! matrixcrawl: crawl scheduling core.
//! Each concern lives in its own module tree under `src/`.

pub mod prelude;

#[path = "common/lib.rs"]
pub mod common;
#[path = "downloader/lib.rs"]
pub mod downloader;
#[path = "engine/lib.rs"]
pub mod engine;
#[path = "errors/lib.rs"]
pub mod errors;
#[path = "history/lib.rs"]
pub mod history;
#[path = "proxy/lib.rs"]
pub mod proxy;
#[path = "utils/lib.rs"]
pub mod utils;
