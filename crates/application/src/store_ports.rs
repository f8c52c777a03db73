mod clock;
mod failure_mode;
mod key_value_store;

pub use clock::Clock;
pub use failure_mode::StoreFailureMode;
pub use key_value_store::KeyValueStore;
