/* src/daemon.rs */

use crate::config::CmdConfig;
use crate::error::DaemonError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Control surface of the nameserver daemon and its offline checkers.
#[async_trait]
pub trait DaemonControl: Send + Sync + 'static {
    /// Succeeds only if `path` is a loadable master file for `zone`.
    async fn check_zone(&self, zone: &str, path: &Path) -> Result<(), DaemonError>;

    /// Succeeds only if `path` is a syntactically valid config fragment.
    async fn check_config(&self, path: &Path) -> Result<(), DaemonError>;

    async fn reload(&self) -> Result<(), DaemonError>;

    async fn reload_zone(&self, zone: &str) -> Result<(), DaemonError>;

    async fn notify(&self, zone: &str) -> Result<(), DaemonError>;
}

/// Drives BIND through `rndc`, `named-checkzone` and `named-checkconf`.
pub struct Rndc {
    cmd: CmdConfig,
    deadline: Duration,
}

impl Rndc {
    pub fn new(cmd: CmdConfig, deadline: Duration) -> Self {
        Self { cmd, deadline }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<(), DaemonError> {
        let command = format!("{} {}", program, args.join(" "));
        log(LogLevel::Debug, &format!("Running {}", command));

        let child = Command::new(program).args(args).kill_on_drop(true).output();
        let output = match timeout(self.deadline, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(DaemonError::Spawn { command, source }),
            Err(_) => return Err(DaemonError::Timeout { command }),
        };

        if output.status.success() {
            return Ok(());
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(DaemonError::Failed {
            command,
            status: output.status,
            output: text.trim().to_string(),
        })
    }
}

#[async_trait]
impl DaemonControl for Rndc {
    async fn check_zone(&self, zone: &str, path: &Path) -> Result<(), DaemonError> {
        let path = path.to_string_lossy();
        self.run(&self.cmd.checkzone, &[zone, &*path]).await
    }

    async fn check_config(&self, path: &Path) -> Result<(), DaemonError> {
        let path = path.to_string_lossy();
        self.run(&self.cmd.checkconf, &[&*path]).await
    }

    async fn reload(&self) -> Result<(), DaemonError> {
        self.run(&self.cmd.rndc, &["reload"]).await
    }

    async fn reload_zone(&self, zone: &str) -> Result<(), DaemonError> {
        self.run(&self.cmd.rndc, &["reload", zone]).await
    }

    async fn notify(&self, zone: &str) -> Result<(), DaemonError> {
        self.run(&self.cmd.rndc, &["notify", zone]).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        CheckZone(String),
        CheckConfig,
        Reload,
        ReloadZone(String),
        Notify(String),
    }

    /// Records every call; checkers can be told to fail.
    #[derive(Default)]
    pub struct FakeDaemon {
        pub calls: Mutex<Vec<Call>>,
        pub fail_check_zone: Mutex<bool>,
        pub fail_check_config: Mutex<bool>,
    }

    impl FakeDaemon {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn count(&self, call: &Call) -> usize {
            self.calls.lock().iter().filter(|c| *c == call).count()
        }

        fn failure(command: &str) -> DaemonError {
            DaemonError::Failed {
                command: command.to_string(),
                status: ExitStatus::from_raw(1 << 8),
                output: "rejected".to_string(),
            }
        }
    }

    #[async_trait]
    impl DaemonControl for FakeDaemon {
        async fn check_zone(&self, zone: &str, path: &Path) -> Result<(), DaemonError> {
            assert!(path.exists(), "checker ran against a missing file");
            self.calls.lock().push(Call::CheckZone(zone.to_string()));
            if *self.fail_check_zone.lock() {
                return Err(Self::failure("named-checkzone"));
            }
            Ok(())
        }

        async fn check_config(&self, path: &Path) -> Result<(), DaemonError> {
            assert!(path.exists(), "checker ran against a missing file");
            self.calls.lock().push(Call::CheckConfig);
            if *self.fail_check_config.lock() {
                return Err(Self::failure("named-checkconf"));
            }
            Ok(())
        }

        async fn reload(&self) -> Result<(), DaemonError> {
            self.calls.lock().push(Call::Reload);
            Ok(())
        }

        async fn reload_zone(&self, zone: &str) -> Result<(), DaemonError> {
            self.calls.lock().push(Call::ReloadZone(zone.to_string()));
            Ok(())
        }

        async fn notify(&self, zone: &str) -> Result<(), DaemonError> {
            self.calls.lock().push(Call::Notify(zone.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rndc(rndc: &str, deadline: Duration) -> Rndc {
        Rndc::new(
            CmdConfig {
                rndc: rndc.to_string(),
                checkzone: "true".to_string(),
                checkconf: "false".to_string(),
            },
            deadline,
        )
    }

    #[tokio::test]
    async fn exit_status_decides_success() {
        let daemon = rndc("true", Duration::from_secs(5));
        assert!(daemon.check_zone("example.com", Path::new("/dev/null")).await.is_ok());
        assert!(daemon.reload().await.is_ok());
        assert!(matches!(
            daemon.check_config(Path::new("/dev/null")).await,
            Err(DaemonError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let daemon = rndc("/nonexistent/rndc", Duration::from_secs(5));
        assert!(matches!(
            daemon.notify("example.com").await,
            Err(DaemonError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let daemon = rndc("true", Duration::from_millis(50));
        assert!(matches!(
            daemon.run("sleep", &["5"]).await,
            Err(DaemonError::Timeout { .. })
        ));
    }
}
