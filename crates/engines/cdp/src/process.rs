//! Browser process supervision
//!
//! Launches a Chromium-family binary with a private user-data directory and
//! an ephemeral DevTools port, then discovers the `webSocketDebuggerUrl`
//! from `GET /json/version`.

use periscope_core::engine::LaunchOptions;
use periscope_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// How long to wait for the DevTools endpoint to come up
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const DISCOVERY_POLL: Duration = Duration::from_millis(250);

/// A supervised browser process and its DevTools endpoint
pub struct BrowserProcess {
    child: Child,
    user_data_dir: PathBuf,
    /// The discovered `webSocketDebuggerUrl`
    pub ws_url: String,
}

impl BrowserProcess {
    /// Spawn the browser and wait for its DevTools endpoint
    pub async fn launch(binary: &Path, options: &LaunchOptions) -> Result<Self> {
        let port = ephemeral_port()?;
        let user_data_dir = std::env::temp_dir().join(format!(
            "periscope-profile-{}-{port}",
            std::process::id()
        ));

        let args = launch_args(options, port, &user_data_dir);
        debug!(binary = %binary.display(), port, "launching browser process");

        let child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CreationFailed(format!("spawn {}: {e}", binary.display())))?;

        let ws_url = discover_ws_url(port).await?;
        info!(port, "browser process ready");

        Ok(Self {
            child,
            user_data_dir,
            ws_url,
        })
    }

    /// Kill the process and discard its profile directory
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("browser kill: {e}");
        }
        let _ = tokio::fs::remove_dir_all(&self.user_data_dir).await;
    }
}

/// Assemble the browser command line
fn launch_args(options: &LaunchOptions, port: u16, user_data_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!("--remote-debugging-port={port}"));
    args.push(format!("--user-data-dir={}", user_data_dir.display()));
    args.extend(options.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Bind an ephemeral port and release it for the browser to claim
fn ephemeral_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Poll `/json/version` until the endpoint responds
async fn discover_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{port}/json/version");
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + DISCOVERY_TIMEOUT;

    loop {
        match client.get(&url).send().await {
            Ok(response) => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| Error::CreationFailed(format!("devtools version: {e}")))?;
                if let Some(ws_url) = body["webSocketDebuggerUrl"].as_str() {
                    return Ok(ws_url.to_string());
                }
            }
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::CreationFailed(format!(
                        "devtools endpoint never came up on port {port}: {e}"
                    )));
                }
            }
        }
        tokio::time::sleep(DISCOVERY_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args_headless() {
        let options = LaunchOptions::default();
        let args = launch_args(&options, 9333, Path::new("/tmp/profile"));

        assert_eq!(args[0], "--headless=new");
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().unwrap(), "about:blank");
    }

    #[test]
    fn test_launch_args_headed() {
        let options = LaunchOptions {
            headless: false,
            extra_args: vec![],
        };
        let args = launch_args(&options, 9333, Path::new("/tmp/profile"));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_ephemeral_port_is_nonzero() {
        assert_ne!(ephemeral_port().unwrap(), 0);
    }
}
