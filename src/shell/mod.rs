//! Shell selection.
//!
//! Resolution walks a fixed, platform-specific candidate list and picks
//! the first entry that exists and is executable:
//!
//! - Windows: `pwsh.exe`, `powershell.exe`, `cmd.exe`
//! - Unix: `$SHELL`, `bash`, `zsh`, `sh`
//!
//! A shell can also be requested by name (`--shell` / `session.shell`):
//! `cmd`, `powershell`, `wsl`, `gitbash`, `bash`, `zsh`, `fish`,
//! `custom:<path>`, or any program name or path.
//!
//! The executable check goes through [`ShellProbe`] so the policy can be
//! exercised against a fake filesystem.

mod integration;
mod probe;

pub use integration::{integration_script_for, ShellKind};
pub use probe::{ShellProbe, SystemProbe};

use std::path::PathBuf;

use crate::error::PtyServerError;
use crate::Result;

/// Host platform family, as far as shell selection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// A shell launch candidate: program name (or path) plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCandidate {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCandidate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// A candidate that passed the probe, with its located executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShell {
    pub path: PathBuf,
    pub args: Vec<String>,
}

/// Which shell a session should run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShellChoice {
    /// Walk the platform candidates.
    #[default]
    Auto,
    /// A shell requested by name; non-empty `args` replace the defaults.
    Named { name: String, args: Vec<String> },
    /// An exact program and arguments, spawned without probing.
    Exact(ResolvedShell),
}

/// System-wide Git for Windows install locations.
const GIT_BASH_PATHS: [&str; 2] = [
    "C:\\Program Files\\Git\\bin\\bash.exe",
    "C:\\Program Files (x86)\\Git\\bin\\bash.exe",
];
/// Per-user install location, relative to the user profile.
const GIT_BASH_USER_PATH: &str = "AppData\\Local\\Programs\\Git\\bin\\bash.exe";

/// Ordered candidate list for a shell requested by `name`.
///
/// Names that make no sense on `platform` fall back to the platform
/// candidates; unrecognized names are taken as a program name or path.
pub fn named_candidates(
    platform: Platform,
    name: &str,
    default_shell: Option<&str>,
    user_profile: Option<&str>,
) -> Vec<ShellCandidate> {
    let name = name.trim();
    if let Some(path) = name.strip_prefix("custom:") {
        return vec![ShellCandidate::new(path.trim())];
    }

    match (name, platform) {
        ("cmd", _) => vec![ShellCandidate::new("cmd.exe")],
        ("wsl", _) => vec![ShellCandidate::new("wsl.exe")],
        ("powershell", Platform::Windows) => candidates(platform, None)
            .into_iter()
            .filter(|c| c.program != "cmd.exe")
            .collect(),
        ("powershell", Platform::Unix) => candidates(platform, default_shell),
        ("gitbash", Platform::Windows) => {
            let mut list: Vec<_> = GIT_BASH_PATHS
                .iter()
                .map(|p| p.to_string())
                .chain(
                    user_profile
                        .filter(|p| !p.is_empty())
                        .map(|p| format!("{}\\{}", p.trim_end_matches('\\'), GIT_BASH_USER_PATH)),
                )
                .map(|p| ShellCandidate::new(p).arg("--login"))
                .collect();
            list.extend(candidates(platform, None));
            list
        }
        ("gitbash", Platform::Unix) => vec![ShellCandidate::new("bash")],
        (program, _) => vec![ShellCandidate::new(program)],
    }
}

/// Ordered candidate list for `platform`.
///
/// `default_shell` is the user's configured shell (`$SHELL`); it is only
/// consulted on Unix and ignored when empty.
pub fn candidates(platform: Platform, default_shell: Option<&str>) -> Vec<ShellCandidate> {
    match platform {
        Platform::Windows => vec![
            ShellCandidate::new("pwsh.exe").arg("-NoLogo"),
            ShellCandidate::new("powershell.exe").arg("-NoLogo"),
            ShellCandidate::new("cmd.exe"),
        ],
        Platform::Unix => {
            let mut list = Vec::with_capacity(4);
            if let Some(shell) = default_shell.map(str::trim).filter(|s| !s.is_empty()) {
                list.push(ShellCandidate::new(shell));
            }
            list.extend(["bash", "zsh", "sh"].into_iter().map(ShellCandidate::new));
            list
        }
    }
}

/// Pick the first candidate the probe can locate.
pub fn resolve_from<P: ShellProbe + ?Sized>(
    candidates: &[ShellCandidate],
    probe: &P,
) -> Result<ResolvedShell> {
    candidates
        .iter()
        .find_map(|c| {
            probe.locate(&c.program).map(|path| ResolvedShell {
                path,
                args: c.args.clone(),
            })
        })
        .ok_or_else(|| PtyServerError::NoShellAvailable {
            tried: candidates.iter().map(|c| c.program.clone()).collect(),
        })
}

/// Shell resolver bound to a platform, a default shell and a probe.
#[derive(Debug, Clone)]
pub struct ShellResolver<P = SystemProbe> {
    platform: Platform,
    default_shell: Option<String>,
    user_profile: Option<String>,
    probe: P,
}

impl ShellResolver<SystemProbe> {
    /// Resolver for the running host: current platform, `$SHELL`, `PATH`.
    pub fn from_env() -> Self {
        Self::with_probe(
            Platform::current(),
            std::env::var("SHELL").ok(),
            SystemProbe::from_env(),
        )
        .with_user_profile(std::env::var("USERPROFILE").ok())
    }
}

impl<P: ShellProbe> ShellResolver<P> {
    pub fn with_probe(platform: Platform, default_shell: Option<String>, probe: P) -> Self {
        Self {
            platform,
            default_shell,
            user_profile: None,
            probe,
        }
    }

    /// User profile directory, used to find per-user Git Bash installs.
    pub fn with_user_profile(mut self, user_profile: Option<String>) -> Self {
        self.user_profile = user_profile;
        self
    }

    /// The candidate list this resolver walks.
    pub fn candidates(&self) -> Vec<ShellCandidate> {
        candidates(self.platform, self.default_shell.as_deref())
    }

    /// Resolve a shell, or fail with `NoShellAvailable`.
    pub fn resolve(&self) -> Result<ResolvedShell> {
        resolve_from(&self.candidates(), &self.probe)
    }

    /// Resolve a shell requested by name.
    pub fn resolve_named(&self, name: &str) -> Result<ResolvedShell> {
        let list = named_candidates(
            self.platform,
            name,
            self.default_shell.as_deref(),
            self.user_profile.as_deref(),
        );
        resolve_from(&list, &self.probe)
    }

    /// Resolve whatever `choice` asks for.
    pub fn resolve_choice(&self, choice: &ShellChoice) -> Result<ResolvedShell> {
        match choice {
            ShellChoice::Auto => self.resolve(),
            ShellChoice::Named { name, args } => {
                let mut shell = self.resolve_named(name)?;
                if !args.is_empty() {
                    shell.args = args.clone();
                }
                Ok(shell)
            }
            ShellChoice::Exact(shell) => Ok(shell.clone()),
        }
    }
}

impl Default for ShellResolver<SystemProbe> {
    fn default() -> Self {
        Self::from_env()
    }
}
