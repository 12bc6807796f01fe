/*
 * Small path helpers shared by the core: locating the application's local
 * configuration directory and recognising network paths.
 */
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/*
 * Returns the platform-local (non-roaming) configuration directory for `app_name`,
 * creating it when it does not exist yet. No organisation qualifier is used, so the
 * directory sits directly below the user's local application data folder.
 *
 * Returns `None` when the platform offers no such location or it cannot be created.
 */
pub fn get_base_app_config_local_dir(app_name: &str) -> Option<PathBuf> {
    log::trace!("PathUtils: Resolving config dir for '{app_name}'");
    let proj_dirs = ProjectDirs::from("", "", app_name)?;
    let config_path = proj_dirs.config_local_dir();
    if !config_path.exists() {
        if let Err(e) = fs::create_dir_all(config_path) {
            log::error!("PathUtils: Failed to create config dir {config_path:?}: {e}");
            return None;
        }
        log::debug!("PathUtils: Created config dir {config_path:?}");
    }
    Some(config_path.to_path_buf())
}

/*
 * UNC and similar network paths (`\\server\share`, `//server/share`). Their ancestor
 * chain cannot be walked cheaply, so ancestor checks skip them.
 */
pub fn is_network_path(path: &Path) -> bool {
    let text = path.to_string_lossy();
    text.starts_with("\\\\") || text.starts_with("//")
}
