//! Runs a handler as a child process, stdio wired to the engine queues.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{Engine, EngineEndpoint, EngineFactory, FactoryLoader};
use crate::config::HandlerConfig;
use crate::error::{Error, Result};
use crate::metrics;

/// A handler running as a child process.
///
/// Three pumps run concurrently: engine-in lines go to the child's stdin
/// with a newline appended, stdout lines go to engine-out (the bounded
/// send is the backpressure toward the child), and stderr lines go to the
/// debug log. Cancellation closes stdin; the child is expected to exit on
/// EOF.
pub struct ExecEngine {
    command: Vec<String>,
    env: HashMap<String, String>,
    endpoint: EngineEndpoint,
}

impl ExecEngine {
    pub fn new(
        command: Vec<String>,
        env: HashMap<String, String>,
        endpoint: EngineEndpoint,
    ) -> Self {
        Self {
            command,
            env,
            endpoint,
        }
    }
}

#[async_trait]
impl Engine for ExecEngine {
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<()> {
        let Self {
            command,
            env,
            endpoint,
        } = *self;
        let EngineEndpoint { mut input, output } = endpoint;

        let Some(program) = command.first().cloned() else {
            error!("empty handler command");
            return Err(Error::EmptyHandler);
        };

        let mut child = match Command::new(&program)
            .args(&command[1..])
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                error!(handler = %program, error = %source, "failed to spawn handler");
                return Err(Error::Spawn {
                    command: program,
                    source,
                });
            }
        };

        let mut stdin = child.stdin.take().ok_or(Error::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(Error::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(Error::Pipe("stderr"))?;

        metrics::EXEC_ENGINES.inc();
        debug!(handler = %program, pid = ?child.id(), "handler started");

        let pumps = cancel.child_token();

        let stdin_cancel = pumps.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = input.recv() => {
                        let Some(line) = line else { break };
                        if stdin.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                        if stdin.write_all(b"\n").await.is_err() {
                            break;
                        }
                        if stdin.flush().await.is_err() {
                            break;
                        }
                    }
                    _ = stdin_cancel.cancelled() => break,
                }
            }
            // Dropping stdin closes the pipe; the handler sees EOF.
        });

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if output.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        debug!(%error, "handler stdout read failed");
                        break;
                    }
                }
            }
        });

        let stderr_handler = program.clone();
        let stderr_pump = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(handler = %stderr_handler, "stderr: {line}");
            }
        });

        let status = child.wait().await;
        pumps.cancel();
        let _ = writer.await;
        let _ = reader.await;
        let _ = stderr_pump.await;
        metrics::EXEC_ENGINES.dec();

        match status {
            Ok(status) if status.success() => {
                debug!(handler = %program, "handler exited");
            }
            Ok(status) => {
                debug!(handler = %program, %status, "handler exited with failure");
            }
            Err(error) => {
                error!(handler = %program, %error, "failed to wait for handler");
            }
        }
        Ok(())
    }
}

/// Factory for executable handlers.
pub struct ExecFactory {
    config: HandlerConfig,
    command: Vec<String>,
}

impl EngineFactory for ExecFactory {
    fn config(&self) -> &HandlerConfig {
        &self.config
    }

    fn create(
        &self,
        env: HashMap<String, String>,
        endpoint: EngineEndpoint,
    ) -> Box<dyn Engine> {
        Box::new(ExecEngine::new(self.command.clone(), env, endpoint))
    }
}

/// Loader for the built-in `executable` engine kind.
pub struct ExecFactoryLoader;

impl FactoryLoader for ExecFactoryLoader {
    fn load(&self, config: HandlerConfig) -> Arc<dyn EngineFactory> {
        let command = config
            .handler
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Arc::new(ExecFactory { config, command })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::engine::EngineQueues;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn engine(command: &[&str], env: HashMap<String, String>) -> (EngineQueues, Box<ExecEngine>) {
        let (queues, endpoint) = EngineQueues::new();
        let command = command.iter().map(|part| part.to_string()).collect();
        (queues, Box::new(ExecEngine::new(command, env, endpoint)))
    }

    #[tokio::test]
    async fn echoes_lines_through_cat() {
        let (mut queues, engine) = engine(&["/bin/cat"], HashMap::new());
        let handle = tokio::spawn(engine.run(CancellationToken::new()));

        queues.input.send("hello".to_string()).await.unwrap();
        let line = timeout(RECV_TIMEOUT, queues.output.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("hello"));

        // Closing the input queue closes stdin; cat exits and the output
        // queue closes behind it.
        drop(queues.input);
        let eof = timeout(RECV_TIMEOUT, queues.output.recv()).await.unwrap();
        assert!(eof.is_none());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn passes_environment_to_handler() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("env.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"$BOTMAND_PROBE\"\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let env = HashMap::from([("BOTMAND_PROBE".to_string(), "marker".to_string())]);
        let (mut queues, engine) = engine(&[script.to_str().unwrap()], env);
        let handle = tokio::spawn(engine.run(CancellationToken::new()));

        let line = timeout(RECV_TIMEOUT, queues.output.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("marker"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_closes_stdin_and_engine_exits() {
        let (mut queues, engine) = engine(&["/bin/cat"], HashMap::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));

        cancel.cancel();
        let eof = timeout(RECV_TIMEOUT, queues.output.recv()).await.unwrap();
        assert!(eof.is_none());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_closes_queues() {
        let (mut queues, engine) = engine(&["/nonexistent/handler"], HashMap::new());
        let result = engine.run(CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(queues.output.recv().await.is_none());
    }

    #[tokio::test]
    async fn loader_splits_handler_into_argv() {
        let config = HandlerConfig {
            name: "echo".to_string(),
            handler: "/bin/echo marker".to_string(),
            engine: "executable".to_string(),
            environment: HashMap::new(),
            triggers: vec![".".to_string()],
            direct_message_triggers_only: false,
            direct_messages_only: false,
            channels: Vec::new(),
            threaded: false,
            prefix_username: false,
        };
        let factory = ExecFactoryLoader.load(config);

        let (mut queues, endpoint) = EngineQueues::new();
        let engine = factory.create(HashMap::new(), endpoint);
        let handle = tokio::spawn(engine.run(CancellationToken::new()));

        let line = timeout(RECV_TIMEOUT, queues.output.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("marker"));
        handle.await.unwrap().unwrap();
    }
}
