//! Configuration for the bidfeed gateway.
//!
//! Files are discovered as `bidfeed.{toml,yaml,yml,json}` in the working
//! directory, then in `~/.config/bidfeed/`. `${VAR}` and `${VAR:-default}`
//! placeholders are expanded before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, discover_and_load, find_config_file, load_config, set_config_dir,
        to_toml_string,
    },
    schema::{
        AuthConfig, BidfeedConfig, GeneratorConfig, HubConfig, IngressConfig, IngressSource,
        KafkaConfig, ServerConfig, ShutdownPolicy,
    },
};
