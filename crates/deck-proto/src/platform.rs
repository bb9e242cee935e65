use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DAEMON_TCP_PORT: u16 = 9877;

/// Global flag to control whether to use system-installed binaries from PATH
/// instead of bundled ones beside the executable.
/// Defaults to false (use bundled/external binaries).
static USE_SYSTEM_DEPS: AtomicBool = AtomicBool::new(false);

/// Set whether to use system dependencies (from PATH) instead of bundled ones.
pub fn set_use_system_deps(use_system: bool) {
    USE_SYSTEM_DEPS.store(use_system, Ordering::Relaxed);
}

/// Check whether to use system dependencies from PATH.
pub fn should_use_system_deps() -> bool {
    USE_SYSTEM_DEPS.load(Ordering::Relaxed)
}

const DAEMON_TCP_HOST: &str = "127.0.0.1";

pub fn daemon_address() -> String {
    format!("{}:{}", DAEMON_TCP_HOST, DAEMON_TCP_PORT)
}

/// IPC endpoint name for one of the daemon's mpv instances.  `role` keeps
/// the direct-stream and embed players on separate sockets.
#[cfg(unix)]
pub fn mpv_socket_name(role: &str) -> String {
    format!("{}/tunedeck-mpv-{}.sock", std::env::temp_dir().display(), role)
}

#[cfg(windows)]
pub fn mpv_socket_name(role: &str) -> String {
    format!("tunedeck-mpv-{}", role)
}

#[cfg(unix)]
pub fn mpv_socket_arg(role: &str) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(role))
}

#[cfg(windows)]
pub fn mpv_socket_arg(role: &str) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name(role))
}

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/tunedeck/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("tunedeck")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunedeck")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("tunedeck")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunedeck")
    }
}

/// Executable file names for `tool` on this platform.
fn binary_names(tool: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![format!("{tool}.exe"), tool.to_string()]
    } else {
        vec![tool.to_string()]
    }
}

fn find_beside_exe(names: &[String]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    names
        .iter()
        .flat_map(|name| [dir.join(name), dir.join("external").join(name)])
        .find(|p| p.exists())
}

fn find_on_path(names: &[String]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|p| p.exists())
}

/// Locate an external tool: `env_override` first, then beside the
/// executable (unless system deps were requested), then PATH.
fn find_tool(env_override: &str, tool: &str) -> Option<PathBuf> {
    if let Some(p) = std::env::var_os(env_override).map(PathBuf::from) {
        if p.exists() {
            return Some(p);
        }
    }
    let names = binary_names(tool);
    if !should_use_system_deps() {
        if let Some(p) = find_beside_exe(&names) {
            return Some(p);
        }
    }
    find_on_path(&names)
}

pub fn find_mpv_binary() -> Option<PathBuf> {
    find_tool("MPV_PATH", "mpv")
}

/// yt-dlp backs mpv's ytdl hook in the embed player.
pub fn find_yt_dlp_binary() -> Option<PathBuf> {
    find_tool("YT_DLP_PATH", "yt-dlp")
}
