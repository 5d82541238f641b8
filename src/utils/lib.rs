pub mod encrypt;
pub mod hash;
pub mod logger;
