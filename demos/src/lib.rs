pub mod defaults;
pub mod env;

pub use env::read_env_any;
