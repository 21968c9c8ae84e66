//! Driver process management - spawning and health checking chromedriver/geckodriver

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use taskwright_common::config::BrowserSettings;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};
use crate::session::BrowserKind;
use crate::wait::{WaitEngine, WaitSpec};
use crate::webdriver::WebDriverClient;

/// Handle to a running driver process
pub struct DriverProcess {
    child: Child,
    base_url: String,
    port: u16,
}

impl DriverProcess {
    /// Spawn the driver binary and wait until it accepts sessions
    pub async fn spawn(config: DriverConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning {} on port {}", config.binary_path.display(), port);

        let mut cmd = Command::new(&config.binary_path);
        match config.browser {
            BrowserKind::Chrome => cmd.arg(format!("--port={}", port)),
            BrowserKind::Firefox => cmd.arg("--port").arg(port.to_string()),
        };
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            E2eError::DriverStartup(format!(
                "Failed to spawn {}: {}",
                config.binary_path.display(),
                e
            ))
        })?;

        let handle = DriverProcess {
            child,
            base_url: base_url.clone(),
            port,
        };

        handle.wait_for_ready(config.startup_timeout).await?;

        info!("Driver is ready at {}", base_url);
        Ok(handle)
    }

    /// Poll `/status` until the driver reports ready
    async fn wait_for_ready(&self, timeout: Duration) -> E2eResult<()> {
        let client = WebDriverClient::new(&self.base_url)?;
        let attempts = AtomicUsize::new(0);
        let spec = WaitSpec::new(format!("driver at {}", self.base_url))
            .timeout(timeout)
            .poll_interval(Duration::from_millis(100));

        let result = WaitEngine::default()
            .until_true(spec, || {
                let client = &client;
                let attempts = &attempts;
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        info!("Waiting for driver to start...");
                    }
                    // Connection refused is expected while the driver is starting
                    match client.is_ready().await {
                        Ok(ready) => Ok(ready),
                        Err(E2eError::Http(e)) if e.is_connect() => Ok(false),
                        Err(e) => {
                            warn!("Driver status check error: {}", e);
                            Ok(false)
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(E2eError::Timeout { .. }) => {
                Err(E2eError::DriverHealthCheck(attempts.load(Ordering::SeqCst)))
            }
            Err(e) => Err(e),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the driver
    pub fn stop(&mut self) -> E2eResult<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        info!("Stopping driver (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                let grace = Instant::now() + Duration::from_millis(500);
                while Instant::now() < grace {
                    if let Ok(Some(_)) = self.child.try_wait() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
            }
        }

        // Force kill if still running
        let _ = self.child.kill();
        self.child.wait()?;

        Ok(())
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning a driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub binary_path: PathBuf,
    pub browser: BrowserKind,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    pub startup_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&BrowserSettings::default())
    }
}

impl From<&BrowserSettings> for DriverConfig {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            binary_path: settings.driver_path.clone(),
            browser: BrowserKind::parse(&settings.kind).unwrap_or_default(),
            port: None,
            startup_timeout: Duration::from_millis(settings.driver_startup_timeout_ms),
        }
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
