pub mod cache;
pub mod device;
pub mod token;
pub mod version;
