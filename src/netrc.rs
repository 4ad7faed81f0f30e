//! `.netrc` credentials for NASA Earthdata Login
//!
//! Remote OPERA granules redirect through `urs.earthdata.nasa.gov`, which
//! expects HTTP basic credentials. They are kept in the conventional
//! `~/.netrc` file and looked up per host.

use crate::errors::{OperaError, Result};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Earthdata Login host
pub const EARTHDATA_HOST: &str = "urs.earthdata.nasa.gov";

/// Login and password for one machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Parsed `.netrc` file
#[derive(Debug, Clone, Default)]
pub struct Netrc {
    machines: HashMap<String, Credentials>,
    default: Option<Credentials>,
}

impl Netrc {
    /// Parse `.netrc` text
    ///
    /// Tokens are whitespace separated; `macdef` bodies run to the next blank line
    /// and are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut netrc = Netrc::default();
        let mut current: Option<(Option<String>, Option<String>, Option<String>)> = None;
        let mut default_entry = false;

        let mut lines = text.lines();
        let mut pending: Vec<String> = Vec::new();

        loop {
            if pending.is_empty() {
                match lines.next() {
                    Some(line) => {
                        pending = line.split_whitespace().rev().map(str::to_string).collect();
                        continue;
                    }
                    None => break,
                }
            }
            let Some(token) = pending.pop() else { continue };

            match token.as_str() {
                "machine" | "default" => {
                    netrc.finish(current.take(), default_entry);
                    default_entry = token == "default";
                    let machine = if default_entry {
                        None
                    } else {
                        Some(next_token(&mut pending, &mut lines, "machine")?)
                    };
                    current = Some((machine, None, None));
                }
                "login" | "password" | "account" => {
                    let value = next_token(&mut pending, &mut lines, &token)?;
                    let entry = current.as_mut().ok_or_else(|| {
                        OperaError::NetrcError(format!("'{token}' outside a machine entry"))
                    })?;
                    match token.as_str() {
                        "login" => entry.1 = Some(value),
                        "password" => entry.2 = Some(value),
                        _ => {}
                    }
                }
                "macdef" => {
                    pending.clear();
                    for line in lines.by_ref() {
                        if line.trim().is_empty() {
                            break;
                        }
                    }
                }
                other => {
                    return Err(OperaError::NetrcError(format!("unexpected token '{other}'")));
                }
            }
        }
        netrc.finish(current, default_entry);
        Ok(netrc)
    }

    /// Read and parse a `.netrc` file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Credentials for a host, falling back to the `default` entry
    pub fn credentials_for(&self, host: &str) -> Option<&Credentials> {
        self.machines.get(host).or(self.default.as_ref())
    }

    /// Whether a host has its own machine entry
    pub fn has_machine(&self, host: &str) -> bool {
        self.machines.contains_key(host)
    }

    fn finish(
        &mut self,
        entry: Option<(Option<String>, Option<String>, Option<String>)>,
        is_default: bool,
    ) {
        if let Some((machine, Some(login), Some(password))) = entry {
            let credentials = Credentials { login, password };
            match machine {
                Some(host) if !is_default => {
                    self.machines.insert(host, credentials);
                }
                _ => self.default = Some(credentials),
            }
        }
    }
}

fn next_token<'a>(
    pending: &mut Vec<String>,
    lines: &mut impl Iterator<Item = &'a str>,
    after: &str,
) -> Result<String> {
    while pending.is_empty() {
        let line = lines
            .next()
            .ok_or_else(|| OperaError::NetrcError(format!("missing value after '{after}'")))?;
        *pending = line.split_whitespace().rev().map(str::to_string).collect();
    }
    pending
        .pop()
        .ok_or_else(|| OperaError::NetrcError(format!("missing value after '{after}'")))
}

/// `~/.netrc`, when `HOME` is set
pub fn default_netrc_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".netrc"))
}

/// Create a `.netrc` holding Earthdata credentials, readable only by the owner
///
/// # Errors
///
/// Refuses to overwrite an existing file so stored credentials are never lost.
pub fn write_netrc(path: &Path, login: &str, password: &str) -> Result<()> {
    if path.exists() {
        return Err(OperaError::NetrcError(format!(
            "{} exists already; back it up to avoid losing credentials",
            path.display()
        )));
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    writeln!(file, "machine {EARTHDATA_HOST} login {login} password {password}")?;
    Ok(())
}
