pub mod app;
pub mod clock;
pub mod config;
pub mod http;
pub mod persistence;
pub mod provisioner;
pub mod scheduler;
pub mod status;

pub use app::AppState;

/// Version reported on `/health` and `/status`: the build's git hash when one
/// was supplied at compile time, the crate version otherwise.
pub fn get_version() -> String {
    match option_env!("WAITLINE_GIT_HASH") {
        Some(git_hash) if git_hash.len() >= 8 => git_hash[..8].to_string(),
        Some(git_hash) if !git_hash.is_empty() => git_hash.to_string(),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    }
}
