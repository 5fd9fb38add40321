pub mod analyzer;
pub mod config;
pub mod fingerprint;
pub mod model;
pub mod scanner;
pub mod table;

/// Audio file extensions we support
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // Dedicated Rust crates
    "wav", "flac",
    // Symphonia
    "mp3", "ogg", "m4a", "aac", "aif", "aiff",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "soundgroups";
