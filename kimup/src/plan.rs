//! Upload plans: what to send and whether to run it afterwards.
//!
//! A plan is either a list of address/source tasks sent as hex records, or a
//! single pre-formatted paper tape image relayed byte for byte. Mixing the
//! two is rejected when the plan is built, before any port is opened.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{Error, Result};

type Source = Box<dyn Read + Send>;

/// Memory image to upload starting at `address`.
pub struct UploadTask {
    address: u16,
    name: String,
    source: Source,
}

impl UploadTask {
    /// Create a task from any byte reader.
    pub fn new(address: u16, name: impl Into<String>, source: impl Read + Send + 'static) -> Self {
        Self {
            address,
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create a task from an in-memory buffer.
    pub fn from_bytes(address: u16, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(address, name, Cursor::new(data.into()))
    }

    /// Create a task that streams a file.
    pub fn from_file(address: u16, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::new(address, path.display().to_string(), file))
    }

    /// First load address.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Display name of the source.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (u16, String, Source) {
        (self.address, self.name, self.source)
    }
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("address", &format_args!("${:04X}", self.address))
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Pre-formatted paper tape image, relayed as-is.
pub struct TapeImage {
    name: String,
    source: Source,
}

impl TapeImage {
    /// Create a tape image from any byte reader.
    pub fn new(name: impl Into<String>, source: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create a tape image from an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(name, Cursor::new(data.into()))
    }

    /// Create a tape image that streams a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::new(path.display().to_string(), file))
    }

    /// Display name of the tape.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, Source) {
        (self.name, self.source)
    }
}

impl fmt::Debug for TapeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapeImage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// How the load is transmitted.
#[derive(Debug)]
pub enum LoadMode {
    /// Hex records built from each task, then an end-of-load record.
    Chunked(Vec<UploadTask>),
    /// Byte-for-byte relay of a tape image.
    RawRelay(TapeImage),
}

/// A validated upload plan.
#[derive(Debug)]
pub struct UploadPlan {
    mode: LoadMode,
    execute: Option<u16>,
}

impl UploadPlan {
    /// Start building a plan.
    pub fn builder() -> UploadPlanBuilder {
        UploadPlanBuilder::default()
    }

    /// Transmission mode.
    pub fn mode(&self) -> &LoadMode {
        &self.mode
    }

    /// Address to run after the load, if any.
    pub fn execute(&self) -> Option<u16> {
        self.execute
    }

    /// Split into mode and execute address.
    pub fn into_parts(self) -> (LoadMode, Option<u16>) {
        (self.mode, self.execute)
    }
}

/// Builder for [`UploadPlan`].
#[derive(Debug, Default)]
pub struct UploadPlanBuilder {
    tasks: Vec<UploadTask>,
    tapes: Vec<TapeImage>,
    execute: Option<u16>,
}

impl UploadPlanBuilder {
    /// Append a chunked upload task.
    #[must_use]
    pub fn task(mut self, task: UploadTask) -> Self {
        self.tasks
            .push(task);
        self
    }

    /// Relay a raw paper tape image instead of sending records.
    #[must_use]
    pub fn tape(mut self, tape: TapeImage) -> Self {
        self.tapes
            .push(tape);
        self
    }

    /// Run from `address` once the load is confirmed.
    #[must_use]
    pub fn execute(mut self, address: u16) -> Self {
        self.execute = Some(address);
        self
    }

    /// Validate and build the plan.
    pub fn build(mut self) -> Result<UploadPlan> {
        let mode = match (self.tasks.is_empty(), self.tapes.len()) {
            (true, 0) => return Err(Error::Usage("nothing to upload".into())),
            (false, 0) => LoadMode::Chunked(self.tasks),
            (true, 1) => LoadMode::RawRelay(
                self.tapes
                    .remove(0),
            ),
            _ => {
                return Err(Error::Usage("raw paper tape must be the only file".into()));
            },
        };
        Ok(UploadPlan {
            mode,
            execute: self.execute,
        })
    }
}
