//! Configuration loading and env substitution.
//!
//! Config files: `parley.toml`, `parley.yaml`, `parley.yml` or `parley.json`,
//! searched in `./` then the user config directory (`~/.config/parley/`).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, clear_data_dir, config_dir, data_dir, discover_and_load,
        find_config_file, load_config, set_config_dir, set_data_dir,
    },
    schema::{ActivityLogConfig, ParleyConfig, ServerConfig, StreamingConfig},
};
