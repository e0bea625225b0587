//! Configuration loading for the wahub gateway.
//!
//! Config files are discovered in `./` and `~/.config/wahub/`, pass through
//! `${VAR}` substitution, and deserialize into [`WahubConfig`].

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, find_config_file, load_config,
        set_config_dir,
    },
    schema::{LoginConfig, ServerConfig, StorageConfig, WahubConfig, WhatsAppConfig},
};
