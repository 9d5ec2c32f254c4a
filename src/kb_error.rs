use std::{error, fmt};

/// Unified error type
///
/// Most pipeline failures are tied to one particular source file and are
/// collected into a `CompileReport` instead of being returned one at a
/// time, so the caller can show everything that is wrong with a source
/// set in a single pass.
#[derive(Debug)]
pub enum KbError {
    NoValidSources,
    TooManyNodes(usize),
    NodeCountMismatch { expected: usize, actual: usize },
    NodeNameMismatch(usize),
    NodeLinkMismatch(usize),
    NodeRotationMismatch(usize),
    NodeTranslationMismatch(usize),
    InvalidHierarchy(usize),
    GeometryOverflow(usize),
    NodeIndexOutOfRange(i32),
    VertexIndexOutOfRange(u32),
    MaterialIndexOutOfRange(i32),
    MarkerRegionOutOfRange(i32),
    VertexCountTooLarge,
    IndexTooLarge,
    Cancelled,
    PipelineBusy,
    /// Raised by the external JMS parser collaborator; never
    /// constructed here, carried through the report like any other
    /// per-file error
    ParseUnavailable(String),
    /// Raised by the external tag serializer collaborator after
    /// packing; the compiled model stays valid so the write can be
    /// retried
    SerializationFailure(String),
    StdIoError(std::io::Error),
    SerdeYamlError(Box<serde_yaml::Error>),
}

impl error::Error for KbError {}

impl fmt::Display for KbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoValidSources => write!(f, "no valid source data"),
            Self::TooManyNodes(a) => {
                write!(f, "skeleton has {a} nodes, limit is 64")
            }
            Self::NodeCountMismatch { expected, actual } => {
                write!(
                    f,
                    "node count {actual} does not match reference \
                     count {expected}"
                )
            }
            Self::NodeNameMismatch(a) => {
                write!(f, "node {a} name does not match reference")
            }
            Self::NodeLinkMismatch(a) => {
                write!(
                    f,
                    "node {a} child or sibling index does not match reference"
                )
            }
            Self::NodeRotationMismatch(a) => {
                write!(f, "node {a} rotation does not match reference")
            }
            Self::NodeTranslationMismatch(a) => {
                write!(f, "node {a} translation does not match reference")
            }
            Self::InvalidHierarchy(a) => {
                write!(f, "node {a} has an out of range child or sibling")
            }
            Self::GeometryOverflow(a) => {
                write!(f, "model compiles to {a} geometries, limit is 256")
            }
            Self::NodeIndexOutOfRange(a) => {
                write!(f, "node index {a} is out of range")
            }
            Self::VertexIndexOutOfRange(a) => {
                write!(f, "vertex index {a} is out of range")
            }
            Self::MaterialIndexOutOfRange(a) => {
                write!(f, "material index {a} is out of range")
            }
            Self::MarkerRegionOutOfRange(a) => {
                write!(f, "marker region index {a} is out of range")
            }
            Self::VertexCountTooLarge => {
                write!(f, "part vertex count does not fit in 16 bit indices")
            }
            Self::IndexTooLarge => write!(f, "index does not fit in 16 bits"),
            Self::Cancelled => write!(f, "compilation was cancelled"),
            Self::PipelineBusy => {
                write!(f, "a compilation is already running on this pipeline")
            }
            Self::ParseUnavailable(a) => {
                write!(f, "source could not be parsed: {a}")
            }
            Self::SerializationFailure(a) => {
                write!(f, "tag serialization failed: {a}")
            }
            Self::StdIoError(e) => write!(f, "std::io::Error: {}", e.kind()),
            Self::SerdeYamlError(e) => write!(f, "serde_yaml::Error: {e}"),
        }
    }
}

impl From<std::io::Error> for KbError {
    fn from(e: std::io::Error) -> Self {
        Self::StdIoError(e)
    }
}

impl From<serde_yaml::Error> for KbError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::SerdeYamlError(Box::new(e))
    }
}

/// Non-fatal findings. These never abort a compile.
#[derive(Debug)]
pub enum KbWarning {
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for KbWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "node list checksum {actual:#010x} differs from \
                     reference {expected:#010x}"
                )
            }
        }
    }
}

/// An error tied to one source file
#[derive(Debug)]
pub struct SourceError {
    pub file: String,
    pub error: KbError,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.error)
    }
}

/// A warning tied to one source file
#[derive(Debug)]
pub struct SourceWarning {
    pub file: String,
    pub warning: KbWarning,
}

impl fmt::Display for SourceWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.warning)
    }
}

/// Everything that went wrong (and everything merely suspicious) with a
/// compile, surfaced in one report so the caller can present a complete
/// list before deciding what to do next.
#[derive(Debug, Default)]
pub struct CompileReport {
    pub errors: Vec<SourceError>,
    pub warnings: Vec<SourceWarning>,
}

impl CompileReport {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for e in &self.errors {
            writeln!(f, "error: {e}")?;
        }
        for w in &self.warnings {
            writeln!(f, "warning: {w}")?;
        }
        Ok(())
    }
}
