//! Command-hook backend.
//!
//! Drives a real fleet through operator-supplied shell templates instead of
//! linking a cloud SDK. Each hook runs under `sh -c` with a deadline:
//!
//! | Hook        | Placeholders                                   | Output             |
//! |-------------|------------------------------------------------|--------------------|
//! | `create`    | `{name}` `{user_data}` `{output_dir}`          | `<id> <address>`   |
//! | `exec`      | `{id}` `{address}` `{name}` `{command}`        | command stdout     |
//! | `copy`      | `{id}` `{address}` `{name}` `{local}`          | ignored            |
//! | `destroy`   | `{id}` `{address}` `{name}`                    | ignored            |
//! | `discovery` | `{name}` `{size}` `{output_dir}`               | discovery URL      |
//!
//! Paths and remote commands are shell-quoted before substitution;
//! identifiers and addresses are inserted verbatim.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, ClusterFactory, Machine};
use crate::error::PlatformError;

fn default_timeout_secs() -> u64 {
    300
}

/// Hook templates for one platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub create: String,
    pub exec: String,
    pub copy: String,
    pub destroy: String,
    #[serde(default)]
    pub discovery: Option<String>,
    /// Deadline for every hook invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Board the images are built for, e.g. `arm64-usr`.
    #[serde(default)]
    pub board: Option<String>,
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Quote `s` for inclusion in a POSIX shell command line.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Substitute `{key}` placeholders in one pass. Unknown placeholders are
/// left untouched, and substituted values are never rescanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Run one hook under `sh -c`, returning its stdout.
async fn run_hook(script: &str, timeout: Duration) -> Result<Vec<u8>, PlatformError> {
    debug!(command = %script, "Running backend hook");

    let child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(PlatformError::Timeout {
                command: script.to_string(),
                timeout,
            })
        }
    };

    if !output.status.success() {
        return Err(PlatformError::CommandFailed {
            command: script.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Cluster constructor backed by [`CommandConfig`] hooks.
pub struct CommandFactory {
    config: Arc<CommandConfig>,
}

impl CommandFactory {
    pub fn new(config: CommandConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }
}

#[async_trait]
impl ClusterFactory for CommandFactory {
    async fn new_cluster(&self, output_dir: &Path) -> Result<Arc<dyn Cluster>> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(PlatformError::from)?;

        let suffix: u32 = rand::random();
        let name = format!("vmtest-{suffix:08x}");
        info!(cluster = %name, output_dir = %output_dir.display(), "Cluster created");

        Ok(Arc::new(CommandCluster {
            name,
            output_dir: output_dir.to_path_buf(),
            config: Arc::clone(&self.config),
            next_index: AtomicUsize::new(0),
            machines: Mutex::new(Vec::new()),
        }))
    }
}

/// Cluster whose machines are created and driven by shell hooks.
pub struct CommandCluster {
    name: String,
    output_dir: PathBuf,
    config: Arc<CommandConfig>,
    next_index: AtomicUsize,
    machines: Mutex<Vec<Arc<CommandMachine>>>,
}

#[async_trait]
impl Cluster for CommandCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn new_machine(&self, user_data: &str) -> Result<Arc<dyn Machine>> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{}", self.name, index);

        let user_data_path = self.output_dir.join(format!("{name}.user-data"));
        tokio::fs::write(&user_data_path, user_data)
            .await
            .map_err(PlatformError::from)?;

        let output_dir = shell_quote(&self.output_dir.to_string_lossy());
        let user_data_arg = shell_quote(&user_data_path.to_string_lossy());
        let script = render(
            &self.config.create,
            &[
                ("name", name.as_str()),
                ("user_data", user_data_arg.as_str()),
                ("output_dir", output_dir.as_str()),
            ],
        );
        let stdout = run_hook(&script, self.config.timeout()).await?;
        let stdout = String::from_utf8_lossy(&stdout);

        let mut fields = stdout.split_whitespace();
        let (id, address) = match (fields.next(), fields.next(), fields.next()) {
            (Some(id), Some(address), None) => (id.to_string(), address.to_string()),
            _ => return Err(PlatformError::BadCreateOutput(stdout.trim().to_string()).into()),
        };

        info!(machine = %id, address = %address, "Machine started");
        let machine = Arc::new(CommandMachine {
            id,
            address,
            name,
            config: Arc::clone(&self.config),
            destroyed: AtomicBool::new(false),
        });
        self.machines.lock().push(Arc::clone(&machine));
        Ok(machine)
    }

    fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.machines
            .lock()
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn Machine>)
            .collect()
    }

    async fn get_discovery_url(&self, size: usize) -> Result<String> {
        let template = self
            .config
            .discovery
            .as_deref()
            .ok_or(PlatformError::NoDiscovery)?;

        let size = size.to_string();
        let output_dir = shell_quote(&self.output_dir.to_string_lossy());
        let script = render(
            template,
            &[
                ("name", self.name.as_str()),
                ("size", size.as_str()),
                ("output_dir", output_dir.as_str()),
            ],
        );
        let stdout = run_hook(&script, self.config.timeout()).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    async fn destroy(&self) -> Result<()> {
        let machines = self.machines.lock().clone();
        let mut first_err = None;
        for machine in machines {
            if let Err(e) = machine.destroy().await {
                warn!(machine = %machine.id, error = %e, "Failed to destroy machine");
                first_err.get_or_insert(e);
            }
        }
        info!(cluster = %self.name, "Cluster destroyed");
        first_err.map_or(Ok(()), Err)
    }
}

/// Machine addressed through the exec/copy/destroy hooks.
pub struct CommandMachine {
    id: String,
    address: String,
    name: String,
    config: Arc<CommandConfig>,
    destroyed: AtomicBool,
}

impl CommandMachine {
    fn render(&self, template: &str, extra: (&str, &str)) -> String {
        render(
            template,
            &[
                ("id", self.id.as_str()),
                ("address", self.address.as_str()),
                ("name", self.name.as_str()),
                extra,
            ],
        )
    }
}

#[async_trait]
impl Machine for CommandMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn ip(&self) -> &str {
        &self.address
    }

    async fn ssh(&self, cmd: &str) -> Result<Vec<u8>> {
        let script = self.render(&self.config.exec, ("command", shell_quote(cmd).as_str()));
        Ok(run_hook(&script, self.config.timeout()).await?)
    }

    async fn copy_file(&self, local: &Path) -> Result<()> {
        let local = shell_quote(&local.to_string_lossy());
        let script = self.render(&self.config.copy, ("local", local.as_str()));
        run_hook(&script, self.config.timeout()).await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let script = self.render(&self.config.destroy, ("command", ""));
        run_hook(&script, self.config.timeout()).await?;
        // Only a successful hook counts; a failed one is retried by the next destroy.
        self.destroyed.store(true, Ordering::SeqCst);
        debug!(machine = %self.id, "Machine destroyed");
        Ok(())
    }
}
