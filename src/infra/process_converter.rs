use crate::app::ports::ConverterPort;
use crate::config::ConverterConfig;
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs the external converter as `program [args...] <output_root> <input_path>`
/// and waits for it to exit. Stdio is inherited from the dispatcher.
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ConverterPort for ProcessConverter {
    async fn convert(&self, output_root: &Path, input_path: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(output_root)
            .arg(input_path)
            .kill_on_drop(true);

        debug!(program = %self.program, input = %input_path.display(), "Spawning converter");
        let mut child = command.spawn().map_err(|source| DispatchError::ConverterInvocation {
            program: self.program.clone(),
            path: input_path.to_path_buf(),
            source,
        })?;

        let waited = match self.timeout {
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, child.wait()).await;
                match outcome {
                    Ok(waited) => waited,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(DispatchError::ConverterExecution {
                            path: input_path.to_path_buf(),
                            reason: format!("timed out after {}s", limit.as_secs()),
                        });
                    }
                }
            }
            None => child.wait().await,
        };

        let status = waited.map_err(|e| DispatchError::ConverterExecution {
            path: input_path.to_path_buf(),
            reason: format!("failed waiting for converter: {}", e),
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(DispatchError::ConverterExecution {
                path: input_path.to_path_buf(),
                reason: describe_status(status),
            })
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}
