use crate::config::UpdateApiConfig;
use crate::error::Result;
use crate::process::{CommandSpec, ProcessRunner};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Ordered `--key` / value pairs passed to the update service
pub type UpdateParams = Vec<(String, String)>;

/// Update-notification service that tells installations about releases
pub trait UpdateApi: Send + Sync {
    fn insert_release_data(&self, params: &UpdateParams) -> Result<()>;
    fn update_release_notes(&self, params: &UpdateParams) -> Result<()>;
    fn publish_release(&self, params: &UpdateParams) -> Result<()>;
}

/// [UpdateApi] driven through a remote console command
///
/// Each operation runs `<prefix> <operation> --key=value ...`. When the
/// prefix goes through `ssh`, the remote shell re-parses the joined argv,
/// so the operation and every parameter are shell-quoted first.
pub struct CommandUpdateApi {
    runner: Arc<dyn ProcessRunner>,
    prefix: Vec<String>,
    timeout: Duration,
    remote_shell: bool,
}

impl CommandUpdateApi {
    pub fn new(runner: Arc<dyn ProcessRunner>, prefix: Vec<String>, timeout: Duration) -> Self {
        let remote_shell = prefix
            .first()
            .and_then(|program| Path::new(program).file_name())
            .is_some_and(|name| name == "ssh");
        CommandUpdateApi {
            runner,
            prefix,
            timeout,
            remote_shell,
        }
    }

    pub fn from_config(runner: Arc<dyn ProcessRunner>, config: &UpdateApiConfig) -> Result<Self> {
        Ok(Self::new(runner, config.command_prefix()?, config.timeout()))
    }

    fn call(&self, operation: &str, params: &UpdateParams) -> Result<()> {
        let arguments = std::iter::once(operation.to_string())
            .chain(params.iter().map(|(key, value)| format!("{}={}", key, value)))
            .map(|arg| if self.remote_shell { shell_quote(&arg) } else { arg });
        let spec = CommandSpec::from_argv(&self.prefix)?
            .args(arguments)
            .timeout(Some(self.timeout));

        info!("Update API: {}", operation);
        self.runner.run_checked(&spec)?;
        Ok(())
    }
}

/// Quote `arg` for a POSIX shell; plain words are left as they are
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:/=@%+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

impl UpdateApi for CommandUpdateApi {
    fn insert_release_data(&self, params: &UpdateParams) -> Result<()> {
        self.call("insert:release:data", params)
    }

    fn update_release_notes(&self, params: &UpdateParams) -> Result<()> {
        self.call("update:release:notes", params)
    }

    fn publish_release(&self, params: &UpdateParams) -> Result<()> {
        self.call("publish:release", params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReleaseError;
    use crate::process::RecordingRunner;

    fn params() -> UpdateParams {
        vec![
            ("--release-version".to_string(), "6.3.0.0".to_string()),
            ("--channel".to_string(), "100".to_string()),
        ]
    }

    #[test]
    fn test_operations_use_key_value_arguments() {
        let runner = Arc::new(RecordingRunner::new());
        let config = UpdateApiConfig {
            host: Some("update.example.com".to_string()),
            ..UpdateApiConfig::default()
        };
        let api = CommandUpdateApi::from_config(runner.clone(), &config).unwrap();

        api.insert_release_data(&params()).unwrap();
        api.publish_release(&params()).unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "ssh shopware@update.example.com php /var/www/shopware-update-api/bin/console insert:release:data --release-version=6.3.0.0 --channel=100",
                "ssh shopware@update.example.com php /var/www/shopware-update-api/bin/console publish:release --release-version=6.3.0.0 --channel=100",
            ]
        );
    }

    #[test]
    fn test_failed_call_propagates() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("update:release:notes", 255, "", "Connection refused");
        let api = CommandUpdateApi::new(runner, vec!["console".to_string()], Duration::from_secs(5));
        let err = api.update_release_notes(&params()).unwrap_err();
        assert!(matches!(err, ReleaseError::Process { exit_code: 255, .. }));
    }

    #[test]
    fn test_remote_arguments_are_quoted_for_ssh() {
        let runner = Arc::new(RecordingRunner::new());
        let prefix = vec!["/usr/bin/ssh".to_string(), "update.example.com".to_string(), "console".to_string()];
        let api = CommandUpdateApi::new(runner.clone(), prefix, Duration::from_secs(5));
        let params = vec![
            ("--release-version".to_string(), "6.3.0.0".to_string()),
            ("--version-text".to_string(), "Release Candidate".to_string()),
            ("--install-uri".to_string(), "https://example.com/a b;rm -rf".to_string()),
            ("--note".to_string(), "it's".to_string()),
        ];
        api.update_release_notes(&params).unwrap();

        assert_eq!(
            runner.specs()[0].args,
            vec![
                "update.example.com",
                "console",
                "update:release:notes",
                "--release-version=6.3.0.0",
                "'--version-text=Release Candidate'",
                "'--install-uri=https://example.com/a b;rm -rf'",
                "'--note=it'\\''s'",
            ]
        );
    }

    #[test]
    fn test_local_console_arguments_are_not_quoted() {
        let runner = Arc::new(RecordingRunner::new());
        let api = CommandUpdateApi::new(runner.clone(), vec!["console".to_string()], Duration::from_secs(5));
        let params = vec![("--version-text".to_string(), "Release Candidate".to_string())];
        api.update_release_notes(&params).unwrap();
        assert_eq!(runner.specs()[0].args[1], "--version-text=Release Candidate");
    }

    /// A stand-in `ssh` that hands its joined arguments to a shell, the
    /// way the real client hands them to the remote login shell
    #[cfg(unix)]
    #[test]
    fn test_values_survive_the_remote_shell() {
        use crate::process::SystemRunner;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let received = dir.path().join("received");
        let ssh = dir.path().join("ssh");
        let console = dir.path().join("console");
        fs::write(&ssh, "#!/bin/sh\nshift\nexec sh -c \"$*\"\n").unwrap();
        fs::write(
            &console,
            format!(
                "#!/bin/sh\nfor arg in \"$@\"; do echo \"[$arg]\"; done > '{}'\n",
                received.display()
            ),
        )
        .unwrap();
        for script in [&ssh, &console] {
            fs::set_permissions(script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let prefix = vec![
            ssh.display().to_string(),
            "update.example.com".to_string(),
            console.display().to_string(),
        ];
        let api = CommandUpdateApi::new(Arc::new(SystemRunner), prefix, Duration::from_secs(10));
        let params = vec![
            ("--channel".to_string(), "80".to_string()),
            ("--version-text".to_string(), "Release Candidate $HOME; it's".to_string()),
        ];
        api.update_release_notes(&params).unwrap();

        assert_eq!(
            fs::read_to_string(&received).unwrap(),
            "[update:release:notes]\n[--channel=80]\n[--version-text=Release Candidate $HOME; it's]\n"
        );
    }

    #[test]
    fn test_missing_host_is_a_config_error() {
        let runner = Arc::new(RecordingRunner::new());
        let result = CommandUpdateApi::from_config(runner, &UpdateApiConfig::default());
        assert!(matches!(result, Err(ReleaseError::Config(_))));
    }
}
