//! Default paths for parkwatch components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/parkwatch/parkwatchd.sock` or `/tmp/parkwatch-$USER/parkwatchd.sock`
//! - Data: `$XDG_DATA_HOME/parkwatch` or `~/.local/share/parkwatch`
//! - Config: `$XDG_CONFIG_HOME/parkwatch/config.toml` or `~/.config/parkwatch/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const PARKWATCH_SOCKET_ENV: &str = "PARKWATCH_SOCKET";

/// Environment variable for overriding the data directory
pub const PARKWATCH_DATA_DIR_ENV: &str = "PARKWATCH_DATA_DIR";

const SOCKET_FILENAME: &str = "parkwatchd.sock";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "parkwatch";

fn home_subdir(parts: &[&str]) -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let mut path = PathBuf::from(home);
    path.extend(parts);
    Some(path.join(APP_DIR))
}

/// Socket path: `$PARKWATCH_SOCKET`, else [`socket_path_without_env`]
pub fn default_socket_path() -> PathBuf {
    match std::env::var(PARKWATCH_SOCKET_ENV) {
        Ok(path) => PathBuf::from(path),
        Err(_) => socket_path_without_env(),
    }
}

/// Socket path ignoring `$PARKWATCH_SOCKET`, used as the config default.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Data directory: `$PARKWATCH_DATA_DIR`, else [`data_dir_without_env`]
pub fn default_data_dir() -> PathBuf {
    match std::env::var(PARKWATCH_DATA_DIR_ENV) {
        Ok(path) => PathBuf::from(path),
        Err(_) => data_dir_without_env(),
    }
}

/// Data directory ignoring `$PARKWATCH_DATA_DIR`, used as the config default.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    home_subdir(&[".local", "share"])
        .unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR).join("data"))
}

/// Default configuration file location
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    home_subdir(&[".config"])
        .unwrap_or_else(|| PathBuf::from("/etc").join(APP_DIR))
        .join(CONFIG_FILENAME)
}
