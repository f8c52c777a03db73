mod purge;
mod redis;
mod state_builder;

pub use purge::spawn_store_purge_loop;
pub use state_builder::build_app_state;
