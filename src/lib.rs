pub mod audio_output;
pub mod config;
pub mod config_persistence;
pub mod console;
pub mod error;
pub mod library_manager;
pub mod library_store;
pub mod metadata_tags;
pub mod playback_controller;
pub mod playback_runtime;
pub mod protocol;
