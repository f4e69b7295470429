use std::path::PathBuf;

pub fn data_dir() -> PathBuf {
    // Use ~/.local/share/radio-coordinator/ (XDG standard) on unix for
    // consistency across macOS and Linux.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("radio-coordinator")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radio-coordinator")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("radio-coordinator")
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radio-coordinator")
    }
}

#[cfg(unix)]
pub fn engine_socket_name() -> String {
    format!(
        "{}/radio-coordinator-mpv.sock",
        std::env::temp_dir().display()
    )
}

#[cfg(windows)]
pub fn engine_socket_name() -> String {
    "radio-coordinator-mpv".to_string()
}

#[cfg(unix)]
pub fn engine_socket_arg() -> String {
    format!("--input-ipc-server={}", engine_socket_name())
}

#[cfg(windows)]
pub fn engine_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", engine_socket_name())
}

/// Locate the mpv binary used as the platform audio engine.
pub fn find_engine_binary() -> Option<PathBuf> {
    let name = if cfg!(windows) { "mpv.exe" } else { "mpv" };
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
