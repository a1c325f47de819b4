//! Line-oriented config file with `server` and `fudge` entries, in the
//! classic NTP daemon shape:
//!
//! ```text
//! server ntp1.example.net prefer
//! server 127.127.20.0     mode 17
//! fudge  127.127.20.0     time1 0.42 refid GPS
//! ```
//!
//! Refclock pseudo-addresses `127.127.20.N` select the NMEA serial driver
//! on serial port `N`; `127.127.28.0..3` select shared-memory segments.
//! The writer rewrites only `server`/`fudge` lines and leaves every other
//! line untouched, aligning the host column to the widest name.

use anyhow::{bail, Context, Result};
use log::warn;
use std::fs;
use std::path::Path;

const NMEA_PREFIX: &str = "127.127.20.";
const SHM_PREFIX: &str = "127.127.28.";
const SHM_SEGMENTS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// `prefer` keyword: favoured source.
    Prefer,
    #[default]
    Normal,
    /// `noselect` keyword: monitored but never selected.
    NoSelect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Driver {
    /// Remote NTP host, by name or address.
    Remote(String),
    /// NMEA serial refclock on the numbered serial port.
    NmeaSerial(u8),
    /// Shared-memory refclock, segments 0 through 3.
    SharedMemory(u8),
}

impl Driver {
    /// The host column as it appears in the file.
    pub fn address(&self) -> String {
        match self {
            Driver::Remote(host) => host.clone(),
            Driver::NmeaSerial(unit) => format!("{}{}", NMEA_PREFIX, unit),
            Driver::SharedMemory(segment) => format!("{}{}", SHM_PREFIX, segment),
        }
    }

    fn parse(token: &str) -> Result<Driver> {
        if let Some(unit) = token.strip_prefix(NMEA_PREFIX) {
            let unit: u8 = unit
                .parse()
                .with_context(|| format!("bad NMEA unit in {}", token))?;
            return Ok(Driver::NmeaSerial(unit));
        }
        if let Some(segment) = token.strip_prefix(SHM_PREFIX) {
            let segment: u8 = segment
                .parse()
                .with_context(|| format!("bad shared-memory segment in {}", token))?;
            if segment >= SHM_SEGMENTS {
                bail!("shared-memory segment {} out of range", segment);
            }
            return Ok(Driver::SharedMemory(segment));
        }
        if token.starts_with("127.127.") {
            bail!("unsupported refclock address {}", token);
        }
        Ok(Driver::Remote(token.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fudge {
    pub time1: Option<f64>,
    pub time2: Option<f64>,
    pub flag1: bool,
    pub refid: Option<String>,
}

impl Fudge {
    fn is_empty(&self) -> bool {
        self.time1.is_none() && self.time2.is_none() && !self.flag1 && self.refid.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub priority: Priority,
    pub driver: Driver,
    pub mode: Option<u32>,
    pub fudge: Fudge,
}

impl ServerConfig {
    pub fn new(driver: Driver) -> Self {
        ServerConfig {
            priority: Priority::Normal,
            driver,
            mode: None,
            fudge: Fudge::default(),
        }
    }
}

/// Parse the `server`/`fudge` entries out of a config text. Malformed
/// entries are logged and skipped; every other line is ignored here (the
/// writer is what preserves them).
pub fn parse(text: &str) -> Vec<ServerConfig> {
    let mut configs: Vec<ServerConfig> = Vec::new();

    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("server") => {
                let Some(addr) = tokens.next() else {
                    warn!("server line without address: {:?}", line);
                    continue;
                };
                let driver = match Driver::parse(addr) {
                    Ok(driver) => driver,
                    Err(e) => {
                        warn!("skipping server {}: {}", addr, e);
                        continue;
                    }
                };
                let mut config = ServerConfig::new(driver);
                while let Some(token) = tokens.next() {
                    match token {
                        "prefer" => config.priority = Priority::Prefer,
                        "noselect" => config.priority = Priority::NoSelect,
                        "mode" => match tokens.next().map(str::parse) {
                            Some(Ok(mode)) => config.mode = Some(mode),
                            _ => warn!("bad mode on server {}", addr),
                        },
                        other => warn!("unknown server option {:?} on {}", other, addr),
                    }
                }
                configs.push(config);
            }
            Some("fudge") => {
                let Some(addr) = tokens.next() else {
                    warn!("fudge line without address: {:?}", line);
                    continue;
                };
                let Some(config) = configs
                    .iter_mut()
                    .find(|c| c.driver.address() == addr)
                else {
                    warn!("fudge for unknown server {}", addr);
                    continue;
                };
                while let Some(token) = tokens.next() {
                    match token {
                        "time1" => match tokens.next().map(str::parse) {
                            Some(Ok(v)) => config.fudge.time1 = Some(v),
                            _ => warn!("bad time1 on fudge {}", addr),
                        },
                        "time2" => match tokens.next().map(str::parse) {
                            Some(Ok(v)) => config.fudge.time2 = Some(v),
                            _ => warn!("bad time2 on fudge {}", addr),
                        },
                        "flag1" => match tokens.next() {
                            Some("1") => config.fudge.flag1 = true,
                            Some("0") => config.fudge.flag1 = false,
                            _ => warn!("bad flag1 on fudge {}", addr),
                        },
                        "refid" => match tokens.next() {
                            Some(tag) => config.fudge.refid = Some(tag.to_string()),
                            None => warn!("bad refid on fudge {}", addr),
                        },
                        other => warn!("unknown fudge option {:?} on {}", other, addr),
                    }
                }
            }
            _ => {}
        }
    }
    configs
}

pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<ServerConfig>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(parse(&text))
}

/// Re-render a config text with `configs` replacing the old `server` and
/// `fudge` lines. The replacement block lands where the first old entry
/// was (or at the end if there was none); all other lines pass through
/// verbatim.
pub fn render(original: &str, configs: &[ServerConfig]) -> String {
    let width = configs
        .iter()
        .map(|c| c.driver.address().len())
        .max()
        .unwrap_or(0);

    let mut block = Vec::new();
    for config in configs {
        block.push(server_line(config, width));
        if !config.fudge.is_empty() {
            block.push(fudge_line(config, width));
        }
    }

    let mut out: Vec<String> = Vec::new();
    let mut block_placed = false;
    for line in original.lines() {
        let first = line.split_whitespace().next();
        if matches!(first, Some("server") | Some("fudge")) {
            if !block_placed {
                out.append(&mut block);
                block_placed = true;
            }
            continue;
        }
        out.push(line.to_string());
    }
    if !block_placed {
        out.append(&mut block);
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

/// Rewrite a config file in place, preserving everything that is not a
/// `server`/`fudge` entry. A missing file is treated as empty.
pub fn write_file(path: impl AsRef<Path>, configs: &[ServerConfig]) -> Result<()> {
    let path = path.as_ref();
    let original = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("reading config {}", path.display())),
    };
    fs::write(path, render(&original, configs))
        .with_context(|| format!("writing config {}", path.display()))
}

fn server_line(config: &ServerConfig, width: usize) -> String {
    let mut line = format!("server {:<width$}", config.driver.address());
    match config.priority {
        Priority::Prefer => line.push_str(" prefer"),
        Priority::NoSelect => line.push_str(" noselect"),
        Priority::Normal => {}
    }
    if let Some(mode) = config.mode {
        line.push_str(&format!(" mode {}", mode));
    }
    line.trim_end().to_string()
}

fn fudge_line(config: &ServerConfig, width: usize) -> String {
    let mut line = format!("fudge  {:<width$}", config.driver.address());
    if let Some(v) = config.fudge.time1 {
        line.push_str(&format!(" time1 {}", v));
    }
    if let Some(v) = config.fudge.time2 {
        line.push_str(&format!(" time2 {}", v));
    }
    if config.fudge.flag1 {
        line.push_str(" flag1 1");
    }
    if let Some(tag) = &config.fudge.refid {
        line.push_str(&format!(" refid {}", tag));
    }
    line.trim_end().to_string()
}

// ============================================================================
// TESTS
// ============================================================================
