//! `pause` — pause playbook execution for a fixed duration, or until the
//! user presses enter at a prompt. Runs entirely on the controller.

use async_trait::async_trait;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::error::Result;
use crate::traits::{ActionContext, ActionPlugin, Return};

/// The `pause` action plugin.
#[derive(Debug)]
pub struct PauseAction;

impl PauseAction {
    fn is_interactive() -> bool {
        use is_terminal::IsTerminal;
        io::stdin().is_terminal()
    }

    fn duration_from_args(args: &std::collections::HashMap<String, serde_json::Value>) -> Option<Duration> {
        if let Some(secs) = args.get("seconds").and_then(|v| v.as_f64()) {
            return Some(Duration::from_secs_f64(secs));
        }
        if let Some(mins) = args.get("minutes").and_then(|v| v.as_f64()) {
            return Some(Duration::from_secs_f64(mins * 60.0));
        }
        None
    }

    fn prompt_and_wait(prompt: &str, echo: bool) -> io::Result<()> {
        print!("[pause] {prompt} (press enter to continue): ");
        io::stdout().flush()?;
        if echo {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
        } else {
            Self::read_line_no_echo()?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn read_line_no_echo() -> io::Result<()> {
        use std::os::unix::io::AsFd;
        let stdin = io::stdin();
        let fd = stdin.as_fd();
        let Ok(mut termios) = nix::sys::termios::tcgetattr(fd) else {
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            return Ok(());
        };
        let original = termios.clone();
        termios.local_flags.remove(nix::sys::termios::LocalFlags::ECHO);
        let _ = nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, &termios);
        let mut line = String::new();
        let result = stdin.lock().read_line(&mut line);
        let _ = nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, &original);
        result.map(|_| ())
    }

    #[cfg(not(unix))]
    fn read_line_no_echo() -> io::Result<()> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|_| ())
    }
}

#[async_trait]
impl ActionPlugin for PauseAction {
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<Return> {
        let prompt = ctx
            .templated_args
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("Press enter to continue")
            .to_string();
        let echo = ctx
            .templated_args
            .get("echo")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        if let Some(duration) = Self::duration_from_args(&ctx.templated_args) {
            tokio::time::sleep(duration).await;
            let mut result = Return::ok();
            result.msg = Some(format!("Paused for {:.0} seconds", duration.as_secs_f64()));
            return Ok(result);
        }

        if !Self::is_interactive() {
            let mut result = Return::ok();
            result.msg = Some("Not running in an interactive terminal, skipping pause".to_string());
            return Ok(result);
        }

        tokio::task::spawn_blocking(move || Self::prompt_and_wait(&prompt, echo))
            .await
            .map_err(|e| crate::error::Error::task_failed("pause", "localhost", e.to_string()))?
            .map_err(|e| crate::error::Error::task_failed("pause", "localhost", e.to_string()))?;

        let mut result = Return::ok();
        result.msg = Some("User confirmed, continuing".to_string());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::local::LocalConnection;
    use serde_json::json;

    #[tokio::test]
    async fn timed_pause_sleeps_and_returns_ok() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("seconds".to_string(), json!(0.01));
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = PauseAction.run(&mut ctx).await.unwrap();
        assert!(!result.failed);
    }
}
