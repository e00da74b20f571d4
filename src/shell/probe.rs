//! Executable lookup used by shell resolution.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Locates an executable by name or path.
pub trait ShellProbe {
    /// Return the executable's path if it exists and may be executed.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Probe backed by the real filesystem and a `PATH` search list.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe {
    search_path: Option<OsString>,
    #[cfg(windows)]
    extensions: Vec<String>,
}

impl SystemProbe {
    /// Probe using the process's `PATH` (and `PATHEXT` on Windows).
    pub fn from_env() -> Self {
        Self::with_search_path(std::env::var_os("PATH"))
    }

    /// Probe using an explicit search path.
    pub fn with_search_path(search_path: Option<OsString>) -> Self {
        Self {
            search_path,
            #[cfg(windows)]
            extensions: std::env::var("PATHEXT")
                .unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string())
                .split(';')
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    fn check(&self, path: &Path) -> Option<PathBuf> {
        if is_executable(path) {
            return Some(path.to_path_buf());
        }
        #[cfg(windows)]
        if path.extension().is_none() {
            for ext in &self.extensions {
                let mut with_ext = path.as_os_str().to_owned();
                with_ext.push(ext);
                let candidate = PathBuf::from(with_ext);
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

impl ShellProbe for SystemProbe {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        let as_path = Path::new(program);
        if as_path.components().count() > 1 || as_path.is_absolute() {
            return self.check(as_path);
        }

        let search_path = self.search_path.as_ref()?;
        std::env::split_paths(search_path)
            .filter(|dir| !dir.as_os_str().is_empty())
            .find_map(|dir| self.check(&dir.join(program)))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
