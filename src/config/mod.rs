pub mod settings;

pub use settings::{open_key_store, KeyStoreBackend, Settings};
