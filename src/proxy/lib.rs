pub mod probe;
pub mod proxy_pool;
pub mod source;

pub use probe::{NetProbe, ProxyProbe};
pub use proxy_pool::*;
pub use source::{ProxyCandidate, parse_proxy_list};
