//! Default filesystem locations for playclockd.
//!
//! Everything lands in user-writable places; the daemon never needs root.
//! The `PLAYCLOCK_SOCKET` and `PLAYCLOCK_DATA_DIR` environment overrides are
//! applied by the daemon's argument parsing, not here: these helpers only
//! answer where things go when nothing was specified.

use std::path::PathBuf;

const APP_DIR: &str = "playclockd";
const SOCKET_FILENAME: &str = "playclockd.sock";

/// Default socket location: `$XDG_RUNTIME_DIR/playclockd/playclockd.sock`,
/// or `/tmp/playclockd-$USER/playclockd.sock` when no runtime dir is set.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir)
            .join(APP_DIR)
            .join(SOCKET_FILENAME);
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".into());
    PathBuf::from(format!("/tmp/{APP_DIR}-{user}")).join(SOCKET_FILENAME)
}

/// Default database directory: `$XDG_DATA_HOME/playclockd`, or
/// `~/.local/share/playclockd`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Default config file: `$XDG_CONFIG_HOME/playclockd/config.toml`, or
/// `~/.config/playclockd/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_is_app_scoped() {
        let path = default_socket_path();
        assert!(path.to_string_lossy().contains("playclockd"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn data_dir_is_app_scoped() {
        let path = default_data_dir();
        assert!(path.to_string_lossy().contains("playclockd"));
    }

    #[test]
    fn config_path_points_at_toml() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("playclockd"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }
}
