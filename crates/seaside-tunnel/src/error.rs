/// Failures creating the tunnel device or applying/removing its
/// routing and firewall rules (spec §6.1, §7's "OS error").
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("failed to create tunnel device: {0}")]
    Create(std::io::Error),

    #[error("failed to discover the default network interface: {0}")]
    DefaultInterface(String),

    #[error("command `{command}` exited with status {status}: {stderr}")]
    CommandFailed { command: String, status: i32, stderr: String },

    #[error("failed to run command `{command}`: {source}")]
    Spawn { command: String, source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
