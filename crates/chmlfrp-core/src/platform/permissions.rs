//! Executable bit handling for the frpc binary.

use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Make a file executable.
///
/// # Platform Behavior
/// - **Linux/macOS**: Adds the user, group and other execute bits to the
///   current mode. Idempotent.
/// - **Windows**: No-op (executability is determined by extension)
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use crate::error::TunnelError;
        use std::os::unix::fs::PermissionsExt;
        let metadata =
            std::fs::metadata(path).map_err(|e| TunnelError::io("read permissions", path, e))?;
        let mut permissions = metadata.permissions();
        let mode = permissions.mode();
        if mode & 0o111 == 0o111 {
            return Ok(());
        }
        permissions.set_mode(mode | 0o111);
        std::fs::set_permissions(path, permissions)
            .map_err(|e| TunnelError::io("set executable bit", path, e))?;
        debug!("Set executable permissions on: {}", path.display());
    }

    #[cfg(windows)]
    {
        debug!("Skipping executable bit on Windows for: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn mode(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode()
    }

    #[test]
    fn test_set_executable() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("frpc");
        File::create(&file_path).unwrap();

        set_executable(&file_path).unwrap();
        // Second call is a no-op
        set_executable(&file_path).unwrap();

        #[cfg(unix)]
        assert_eq!(mode(&file_path) & 0o111, 0o111);
    }

    #[test]
    fn test_set_executable_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does-not-exist");

        #[cfg(unix)]
        assert!(set_executable(&missing).is_err());
        #[cfg(windows)]
        assert!(set_executable(&missing).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_set_executable_keeps_other_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("plain");
        File::create(&file_path).unwrap();
        std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o640)).unwrap();

        set_executable(&file_path).unwrap();
        assert_eq!(mode(&file_path) & 0o777, 0o751);
    }
}
