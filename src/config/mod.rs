// src/config/mod.rs
pub mod component;
pub mod loader;
pub mod timeouts;
pub mod upload;

pub use component::ComponentConfig;
pub use loader::{
    load_init_configuration, load_join_configuration, ClusterConfigSource, ConfigError,
    FileClusterSource, InitOverrides, LoadedInit, NoClusterSource,
};
