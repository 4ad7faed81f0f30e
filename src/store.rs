//! Raster storage: open a GeoTIFF by local path or HTTP(S) URL
//!
//! [`GeoTiffStore`] is configured explicitly through [`StoreConfig`]; cookie
//! jar, credentials, timeouts and retry policy all live on the store instance
//! rather than in process-wide settings.

use crate::errors::{OperaError, Result};
use crate::netrc::{default_netrc_path, Netrc};
use crate::raster::RasterFrame;
use reqwest::blocking::Client;
use reqwest::header::LOCATION;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Anything that can hand back a fully-read raster for a location
pub trait RasterStore: Send + Sync {
    /// Open and read the raster at `location`
    fn open(&self, location: &str) -> Result<RasterFrame>;
}

/// Configuration for [`GeoTiffStore`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Whole-request timeout
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_redirects: usize,
    /// Keep cookies between requests (Earthdata sets a session cookie)
    pub cookie_store: bool,
    /// Look up basic credentials in a `.netrc` file
    pub use_netrc: bool,
    /// Defaults to `~/.netrc`
    pub netrc_path: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            connect_timeout_secs: 30,
            max_retries: 3,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            max_redirects: 10,
            cookie_store: true,
            use_netrc: true,
            netrc_path: None,
            user_agent: format!("opera_cube/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StoreConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(OperaError::ConfigError("timeout_secs must be positive".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(OperaError::ConfigError(
                "connect_timeout_secs must be positive".to_string(),
            ));
        }
        if self.initial_retry_delay_ms > self.max_retry_delay_ms {
            return Err(OperaError::ConfigError(
                "initial_retry_delay_ms exceeds max_retry_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// GeoTIFF store over the local filesystem and HTTP(S)
pub struct GeoTiffStore {
    client: Client,
    config: StoreConfig,
    netrc: Option<Netrc>,
}

impl GeoTiffStore {
    /// Build a store; reads the `.netrc` file once, up front
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, an explicitly configured
    /// `.netrc` cannot be read, or the HTTP client cannot be built.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let netrc = if !config.use_netrc {
            None
        } else if let Some(path) = &config.netrc_path {
            Some(Netrc::from_path(path)?)
        } else {
            match default_netrc_path().filter(|p| p.exists()) {
                Some(path) => Some(Netrc::from_path(&path)?),
                None => {
                    debug!("No .netrc found; remote reads will be anonymous");
                    None
                }
            }
        };

        // Redirects are followed by hand so credentials reach only their own host
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .cookie_store(config.cookie_store)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config,
            netrc,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Fetch a remote object, retrying transient failures with exponential backoff
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.initial_retry_delay_ms);
        let max_delay = Duration::from_millis(self.config.max_retry_delay_ms);

        loop {
            match self.fetch_once(url) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if is_transient(&e) && retry_count < self.config.max_retries => {
                    retry_count += 1;
                    warn!(
                        url,
                        error = %e,
                        retry = retry_count,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        let mut current = Url::parse(url)?;
        for _ in 0..=self.config.max_redirects {
            let mut request = self.client.get(current.clone());
            if let Some(creds) = self.credentials_for(&current) {
                request = request.basic_auth(&creds.login, Some(&creds.password));
            }
            let response = request.send()?;
            let status = response.status();

            if status.is_redirection() {
                let target = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| OperaError::HttpStatus {
                        url: current.to_string(),
                        status: status.as_u16(),
                    })?;
                current = current.join(target)?;
                debug!(to = %redacted(&current), "Following redirect");
                continue;
            }
            if !status.is_success() {
                return Err(OperaError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            return Ok(response.bytes()?.to_vec());
        }
        Err(OperaError::TooManyRedirects {
            url: url.to_string(),
        })
    }

    /// Basic credentials only travel over HTTPS to hosts with their own netrc entry
    fn credentials_for(&self, url: &Url) -> Option<&crate::netrc::Credentials> {
        let netrc = self.netrc.as_ref()?;
        let host = url.host_str()?;
        if url.scheme() != "https" || !netrc.has_machine(host) {
            return None;
        }
        netrc.credentials_for(host)
    }
}

impl RasterStore for GeoTiffStore {
    fn open(&self, location: &str) -> Result<RasterFrame> {
        let started = Instant::now();
        let frame = if is_remote(location) {
            let bytes = self.fetch(location)?;
            debug!(location, bytes = bytes.len(), "Fetched raster");
            RasterFrame::from_geotiff(Cursor::new(bytes), location)?
        } else {
            let path = local_path(location);
            let file = File::open(path).map_err(|e| {
                OperaError::IoError(std::io::Error::new(e.kind(), format!("{location}: {e}")))
            })?;
            RasterFrame::from_geotiff(BufReader::new(file), location)?
        };
        debug!(
            location,
            bands = frame.bands(),
            height = frame.height(),
            width = frame.width(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Read raster"
        );
        Ok(frame)
    }
}

/// Whether a location needs the network
pub fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn local_path(location: &str) -> &Path {
    Path::new(location.strip_prefix("file://").unwrap_or(location))
}

fn is_transient(error: &OperaError) -> bool {
    match error {
        OperaError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_body(),
        OperaError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// URL without its query string, which can carry signed tokens
fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
