//! Working-directory reporting for interactive shells.
//!
//! Once a shell has printed its first output, a one-line script is written
//! to it that makes the shell emit an OSC 7 sequence
//! (`ESC ] 7 ; file://<host><cwd> ESC \`) whenever its directory changes.
//! The line starts with a space so bash and zsh keep it out of history,
//! and it ends by resetting the terminal so the echoed command disappears.

use std::path::Path;

#[cfg(unix)]
const BASH_SCRIPT: &str = concat!(
    r#" eval '__pty_cwd(){ printf "\e]7;file://%s%s\e\\" "${HOSTNAME:-localhost}" "$PWD";};PROMPT_COMMAND="__pty_cwd${PROMPT_COMMAND:+;$PROMPT_COMMAND}"' 2>/dev/null;__pty_cwd;printf '\ec'"#,
    "\n"
);

#[cfg(unix)]
const ZSH_SCRIPT: &str = concat!(
    r#" eval '__pty_cwd(){ printf "\e]7;file://%s%s\e\\" "${HOST:-localhost}" "$PWD";};autoload -Uz add-zsh-hook;add-zsh-hook precmd __pty_cwd;add-zsh-hook chpwd __pty_cwd' 2>/dev/null;__pty_cwd;printf '\ec'"#,
    "\n"
);

#[cfg(unix)]
const FISH_SCRIPT: &str = concat!(
    r#" eval 'function __pty_cwd --on-variable PWD; printf "\e]7;file://%s%s\e\\" (hostname) $PWD; end' 2>/dev/null;__pty_cwd;printf '\ec'"#,
    "\n"
);

/// Shells that support working-directory reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
}

impl ShellKind {
    /// Recognize a shell from its executable path.
    ///
    /// Matches on the file stem, so `/usr/local/bin/zsh`, `bash.exe` and a
    /// login-style `-bash` are all recognized.
    pub fn detect(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        match stem.trim_start_matches('-').to_ascii_lowercase().as_str() {
            "bash" => Some(ShellKind::Bash),
            "zsh" => Some(ShellKind::Zsh),
            "fish" => Some(ShellKind::Fish),
            _ => None,
        }
    }

    /// Script to inject after the shell's first output.
    ///
    /// Always `None` on Windows, where clients track the directory from the
    /// prompt instead.
    pub fn integration_script(self) -> Option<&'static str> {
        #[cfg(unix)]
        {
            Some(match self {
                ShellKind::Bash => BASH_SCRIPT,
                ShellKind::Zsh => ZSH_SCRIPT,
                ShellKind::Fish => FISH_SCRIPT,
            })
        }

        #[cfg(not(unix))]
        {
            let _ = self;
            None
        }
    }
}

/// Integration script for the shell at `path`, if it has one.
pub fn integration_script_for(path: &Path) -> Option<&'static str> {
    ShellKind::detect(path).and_then(ShellKind::integration_script)
}
