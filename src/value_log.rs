//! The observation log: an append-only sink written by instrumented programs.
//!
//! Each call to [`ValueLog::append`] writes exactly one [`Record`] as a single
//! line, using one `write` syscall on a file opened in append mode, so records
//! from concurrently running (and forked) processes interleave without tearing.

use std::env;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::warn;
use thiserror::Error;

/// Environment variable overriding the log path.
pub const LOG_PATH_ENV: &str = "VASE_LOG";

/// Log path used when [`LOG_PATH_ENV`] is absent or empty.
pub const DEFAULT_LOG_PATH: &str = "vase_value_log.txt";

/// External symbol the instrumentation pass emits calls to.
pub const SINK_SYMBOL: &str = "__vase_log_var";

/// Branch field value marking a function-entry observation.
pub const ENTRY_BRANCH: i32 = -1;

/// One observed integer value at a branch side.
///
/// Serialized as `loc:<N>:branch:<B>\t<var>:<val>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub loc: u32,
    pub branch: i32,
    pub var: String,
    pub value: i32,
}

impl Record {
    /// The site key this record contributes to: `loc:<N>:branch:<B>`.
    pub fn site_key(&self) -> String {
        format!("loc:{}:branch:{}", self.loc, self.branch)
    }

    /// The branch-less site key: `loc:<N>`.
    pub fn base_key(&self) -> String {
        format!("loc:{}", self.loc)
    }

    /// Entry observations carry the [`ENTRY_BRANCH`] sentinel and are not
    /// decision points.
    pub fn is_entry(&self) -> bool {
        self.branch < 0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loc:{}:branch:{}\t{}:{}",
            self.loc, self.branch, self.var, self.value
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("missing tab separator")]
    MissingTab,

    #[error("malformed site part: {0:?}")]
    BadSite(String),

    #[error("malformed variable part: {0:?}")]
    BadVar(String),
}

impl FromStr for Record {
    type Err = RecordParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let (site, var) = line.split_once('\t').ok_or(RecordParseError::MissingTab)?;

        let bad_site = || RecordParseError::BadSite(site.to_owned());
        let rest = site.strip_prefix("loc:").ok_or_else(bad_site)?;
        let (loc, rest) = rest.split_once(':').ok_or_else(bad_site)?;
        let loc = loc.parse::<u32>().map_err(|_| bad_site())?;
        let branch = rest
            .strip_prefix("branch:")
            .and_then(|b| b.parse::<i32>().ok())
            .ok_or_else(bad_site)?;

        let bad_var = || RecordParseError::BadVar(var.to_owned());
        let (name, value) = var.rsplit_once(':').ok_or_else(bad_var)?;
        let value = value.parse::<i32>().map_err(|_| bad_var())?;

        if name.is_empty() {
            return Err(bad_var());
        }

        Ok(Record {
            loc,
            branch,
            var: name.to_owned(),
            value,
        })
    }
}

/// Handle to the observation log file.
///
/// The sink is deliberately stateless: every append opens the file, writes one
/// line, and closes it again. Failures are reported and swallowed so the host
/// program never aborts on logging trouble.
#[derive(Debug, Clone)]
pub struct ValueLog {
    path: PathBuf,
}

impl ValueLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolves the log path from [`LOG_PATH_ENV`], falling back to
    /// [`DEFAULT_LOG_PATH`].
    pub fn from_env() -> Self {
        let path = match env::var(LOG_PATH_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_LOG_PATH),
        };

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record. Never fails: open or write errors are logged as
    /// warnings and the call returns.
    pub fn append(&self, record: &Record) {
        let mut file = match OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
        {
            Ok(file) => file,

            Err(e) => {
                warn!(
                    "failed to open observation log {}: {e}",
                    self.path.display()
                );
                return;
            }
        };

        let line = format!("{record}\n");

        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(
                "failed to append to observation log {}: {e}",
                self.path.display()
            );
        }
    }
}
