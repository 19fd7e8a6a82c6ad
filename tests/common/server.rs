//! Test server management.
//!
//! Spawns and manages contacts-api instances for integration testing.

use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;

/// A test server instance running on in-memory backends.
pub struct TestServer {
    child: Child,
    port: u16,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    /// Spawn a server on `port`. `extra` is appended to the generated config.
    pub async fn spawn(port: u16, extra: &str) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let config_path = data_dir.path().join("config.toml");
        let config_content = format!(
            r#"
[server]
listen = "127.0.0.1:{port}"
metrics_port = 0

[database]
backend = "memory"

[cache]
backend = "memory"

[auth]
secret_key = "integration-test-secret-0123456789"
bcrypt_cost = 4

{extra}
"#
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_contacts-api"))
            .arg(&config_path)
            .stdout(Stdio::null())
            .spawn()?;

        let server = Self {
            child,
            port,
            _data_dir: data_dir,
        };
        server.wait_until_ready().await?;
        Ok(server)
    }

    /// Wait until the server is accepting connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Server failed to start within 5 seconds")
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
