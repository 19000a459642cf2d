//! The terminal session backend seam. Production drives tmux; tests use an
//! in-memory fake.

use std::path::Path;

use crate::subprocess::Tool;

/// Terminal session lifecycle as the registry needs it. Every call may block
/// on the backend.
pub trait Sessions {
    /// Names of all live sessions.
    fn list(&self) -> anyhow::Result<Vec<String>>;

    fn exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.list()?.iter().any(|s| s == name))
    }

    /// Create a detached session running in `cwd` with the given extra
    /// environment.
    fn spawn(&self, name: &str, cwd: &Path, env: &[(String, String)]) -> anyhow::Result<()>;

    /// Terminate a session. Graceful first (interrupt, small grace period)
    /// unless `force`; killing an absent session is a no-op.
    fn kill(&self, name: &str, force: bool) -> anyhow::Result<()>;

    /// The currently focused session, if the backend knows one.
    fn focused(&self) -> anyhow::Result<Option<String>>;

    fn focus(&self, name: &str) -> anyhow::Result<()>;
}

/// tmux-backed sessions.
pub struct TmuxSessions;

impl TmuxSessions {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for TmuxSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl Sessions for TmuxSessions {
    fn list(&self) -> anyhow::Result<Vec<String>> {
        let output = Tool::new("tmux")
            .args(&["list-sessions", "-F", "#{session_name}"])
            .run()?;
        // tmux exits nonzero when the server isn't running; that's just an
        // empty town.
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn exists(&self, name: &str) -> anyhow::Result<bool> {
        let output = Tool::new("tmux").args(&["has-session", "-t", name]).run()?;
        Ok(output.success())
    }

    fn spawn(&self, name: &str, cwd: &Path, env: &[(String, String)]) -> anyhow::Result<()> {
        let cwd_str = cwd.to_string_lossy().into_owned();
        let mut args: Vec<String> = vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            name.to_string(),
            "-c".to_string(),
            cwd_str,
        ];
        for (k, v) in env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        Tool::new("tmux").args(&arg_refs).run_ok()?;
        Ok(())
    }

    fn kill(&self, name: &str, force: bool) -> anyhow::Result<()> {
        if !self.exists(name)? {
            return Ok(());
        }
        if !force {
            // Interrupt whatever is running, give it a moment to wind down.
            let _ = Tool::new("tmux")
                .args(&["send-keys", "-t", name, "C-c"])
                .run();
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
        let output = Tool::new("tmux").args(&["kill-session", "-t", name]).run()?;
        // Racing another kill is fine; absence is the goal.
        if !output.success() && self.exists(name)? {
            anyhow::bail!("tmux kill-session {name}: {}", output.stderr.trim());
        }
        Ok(())
    }

    fn focused(&self) -> anyhow::Result<Option<String>> {
        let output = Tool::new("tmux")
            .args(&["display-message", "-p", "#{session_name}"])
            .run()?;
        if !output.success() {
            return Ok(None);
        }
        let name = output.stdout.trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    fn focus(&self, name: &str) -> anyhow::Result<()> {
        Tool::new("tmux")
            .args(&["switch-client", "-t", name])
            .run_ok()?;
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::Mutex;

    use super::Sessions;

    /// In-memory session backend for tests.
    #[derive(Default)]
    pub struct MemSessions {
        state: Mutex<State>,
        /// When set, the next `spawn` fails once (transient backend error).
        pub fail_next_spawn: Mutex<bool>,
    }

    #[derive(Default)]
    struct State {
        sessions: BTreeSet<String>,
        focused: Option<String>,
        pub spawn_count: usize,
    }

    impl MemSessions {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_sessions(names: &[&str]) -> Self {
            let fake = Self::default();
            {
                let mut state = fake.state.lock().expect("state lock");
                for name in names {
                    state.sessions.insert((*name).to_string());
                }
                state.focused = names.first().map(|s| (*s).to_string());
            }
            fake
        }

        pub fn spawn_count(&self) -> usize {
            self.state.lock().expect("state lock").spawn_count
        }

        pub fn set_focused(&self, name: &str) {
            self.state.lock().expect("state lock").focused = Some(name.to_string());
        }
    }

    impl Sessions for MemSessions {
        fn list(&self) -> anyhow::Result<Vec<String>> {
            Ok(self
                .state
                .lock()
                .expect("state lock")
                .sessions
                .iter()
                .cloned()
                .collect())
        }

        fn spawn(&self, name: &str, _cwd: &Path, _env: &[(String, String)]) -> anyhow::Result<()> {
            let mut fail = self.fail_next_spawn.lock().expect("fail lock");
            if *fail {
                *fail = false;
                return Err(crate::error::GtError::Backend("tmux server busy".into()).into());
            }
            drop(fail);

            let mut state = self.state.lock().expect("state lock");
            state.spawn_count += 1;
            if !state.sessions.insert(name.to_string()) {
                return Err(crate::error::GtError::Exists(format!("session {name}")).into());
            }
            Ok(())
        }

        fn kill(&self, name: &str, _force: bool) -> anyhow::Result<()> {
            self.state
                .lock()
                .expect("state lock")
                .sessions
                .remove(name);
            Ok(())
        }

        fn focused(&self) -> anyhow::Result<Option<String>> {
            Ok(self.state.lock().expect("state lock").focused.clone())
        }

        fn focus(&self, name: &str) -> anyhow::Result<()> {
            let mut state = self.state.lock().expect("state lock");
            if !state.sessions.contains(name) {
                return Err(crate::error::GtError::NotFound(format!("session {name}")).into());
            }
            state.focused = Some(name.to_string());
            Ok(())
        }
    }
}
