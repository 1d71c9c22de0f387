//! C11 (ambient): configuration (§4.11).
//!
//! Layering idiom: a defaults struct (`types::CoreConfig::default`), an environment-variable
//! overlay (`env`), then an explicit JSON overlay read from the persisted `sync[config]` key
//! (`parse`), composed and validated by `load`.

pub mod env;
pub mod load;
pub mod parse;
pub mod types;

pub use load::{load, CONFIG_SYNC_KEY};
pub use types::CoreConfig;
