use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::APP_NAME;

/// Registers the application to launch at login.
pub trait AutoStart: Send + Sync {
    fn enable(&self) -> io::Result<()>;
    fn disable(&self) -> io::Result<()>;
    fn is_enabled(&self) -> bool;
}

/// For platforms without a supported registration mechanism.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAutoStart;

impl AutoStart for NoAutoStart {
    fn enable(&self) -> io::Result<()> {
        log::warn!("Auto-start is not supported on this platform");
        Ok(())
    }

    fn disable(&self) -> io::Result<()> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// XDG autostart desktop entry (`~/.config/autostart/cleanbox.desktop`).
#[derive(Debug, Clone)]
pub struct XdgAutoStart {
    entry_path: PathBuf,
    command: String,
}

impl XdgAutoStart {
    pub fn new(autostart_dir: &Path, command: impl Into<String>) -> Self {
        Self {
            entry_path: autostart_dir.join("cleanbox.desktop"),
            command: command.into(),
        }
    }

    /// Entry in the user's config dir that launches the current executable
    /// in monitor mode.
    pub fn for_current_user() -> Option<Self> {
        let dir = dirs::config_dir()?.join("autostart");
        let exe = std::env::current_exe().ok()?;
        Some(Self::new(&dir, format!("\"{}\" monitor", exe.display())))
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    fn desktop_entry(&self) -> String {
        format!(
            "[Desktop Entry]\nType=Application\nName={APP_NAME}\nExec={}\nX-GNOME-Autostart-enabled=true\nNoDisplay=true\n",
            self.command
        )
    }
}

impl AutoStart for XdgAutoStart {
    fn enable(&self) -> io::Result<()> {
        if let Some(dir) = self.entry_path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.entry_path, self.desktop_entry())?;
        log::info!("Auto-start enabled at {}", self.entry_path.display());
        Ok(())
    }

    fn disable(&self) -> io::Result<()> {
        match fs::remove_file(&self.entry_path) {
            Ok(()) => {
                log::info!("Auto-start disabled");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("Auto-start was not enabled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn is_enabled(&self) -> bool {
        self.entry_path.is_file()
    }
}

/// The registration mechanism for the running platform.
pub fn system_autostart() -> Box<dyn AutoStart> {
    if cfg!(all(unix, not(target_os = "macos"))) {
        if let Some(xdg) = XdgAutoStart::for_current_user() {
            return Box::new(xdg);
        }
    }
    Box::new(NoAutoStart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_xdg_enable_disable_cycle() {
        let dir = TempDir::new().unwrap();
        let autostart = XdgAutoStart::new(&dir.path().join("autostart"), "/usr/bin/cleanbox monitor");

        assert!(!autostart.is_enabled());
        autostart.enable().unwrap();
        assert!(autostart.is_enabled());
        let entry = fs::read_to_string(autostart.entry_path()).unwrap();
        assert!(entry.contains("Exec=/usr/bin/cleanbox monitor"));
        assert!(entry.contains("Name=CleanBox"));

        autostart.disable().unwrap();
        assert!(!autostart.is_enabled());
        // Disabling twice is fine.
        autostart.disable().unwrap();
    }
}
