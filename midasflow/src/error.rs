//! Error types and run status codes.
//!
//! Every failure inside the engine is a [`MidasError`]. Errors fall into the
//! categories returned by [`MidasError::kind`], and each category maps onto
//! the integer [`Status`] the entry points hand back to their caller:
//!
//! | Kind | Status | Examples |
//! |---|---|---|
//! | Input | 1 | unreadable dataset, unknown encoding, empty mesh |
//! | Structural integrity | 2 | cycle, dangling downstream pointer |
//! | Resource | 3 | trace stack allocation, output not writable |
//! | Internal | 4 | basin claim conflict |
//! | Cancelled | 5 | external cancellation |

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, MidasError>;

// =============================================================================
// Status
// =============================================================================

/// Integer status returned by the entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    /// The run completed and all outputs were committed.
    Success = 0,
    /// Missing or unreadable input, or an invalid parameter.
    InputError = 1,
    /// The drainage network contains a cycle or a dangling pointer.
    StructuralIntegrity = 2,
    /// An allocation or output write failed.
    ResourceError = 3,
    /// An engine invariant was violated.
    InternalError = 4,
    /// The run was cancelled before it completed.
    Cancelled = 5,
}

impl Status {
    /// Returns the integer code for this status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Parses an integer code back into a status.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Status::Success),
            1 => Some(Status::InputError),
            2 => Some(Status::StructuralIntegrity),
            3 => Some(Status::ResourceError),
            4 => Some(Status::InternalError),
            5 => Some(Status::Cancelled),
            _ => None,
        }
    }

    /// Returns true for [`Status::Success`].
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::InputError => "input error",
            Status::StructuralIntegrity => "structural integrity error",
            Status::ResourceError => "resource error",
            Status::InternalError => "internal error",
            Status::Cancelled => "cancelled",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Category of a [`MidasError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    StructuralIntegrity,
    Resource,
    Internal,
    Cancelled,
}

impl From<ErrorKind> for Status {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Input => Status::InputError,
            ErrorKind::StructuralIntegrity => Status::StructuralIntegrity,
            ErrorKind::Resource => Status::ResourceError,
            ErrorKind::Internal => Status::InternalError,
            ErrorKind::Cancelled => Status::Cancelled,
        }
    }
}

// =============================================================================
// Dangling pointers
// =============================================================================

/// Why a downstream pointer does not resolve to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dangling {
    /// The stored direction value is not part of the encoding.
    InvalidCode(i64),
    /// The pointer names a node that does not exist.
    MissingNode(i64),
}

impl fmt::Display for Dangling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dangling::InvalidCode(code) => write!(f, "invalid direction code {}", code),
            Dangling::MissingNode(target) => write!(f, "missing downstream node {}", target),
        }
    }
}

// =============================================================================
// MidasError
// =============================================================================

/// Errors that can occur during a drainage analysis run.
#[derive(Debug, Error)]
pub enum MidasError {
    // ---- input ------------------------------------------------------------
    /// A required parameter is absent or out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// An option string entry could not be interpreted.
    #[error("invalid option {name}={value}: {reason}")]
    InvalidOption {
        name: String,
        value: String,
        reason: String,
    },

    /// The dataset directory or its manifest does not exist.
    #[error("dataset not found: {}", .0.display())]
    DatasetNotFound(PathBuf),

    /// A dataset file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A dataset file was read but its content is malformed.
    #[error("invalid dataset {}: {reason}", path.display())]
    InvalidDataset { path: PathBuf, reason: String },

    /// The named outlets layer was not found.
    #[error("outlets layer '{layer}' not found at {}", path.display())]
    LayerNotFound { path: PathBuf, layer: String },

    /// A required attribute column is absent from every feature.
    #[error("column '{column}' not found in outlets layer")]
    MissingColumn { column: String },

    /// No outlet could be used, so the mesh would be empty.
    #[error("no usable outlet; {rejected} outlet(s) rejected")]
    EmptyMesh { rejected: usize },

    // ---- structural integrity --------------------------------------------
    /// Following downstream pointers from this node never reaches a sink.
    #[error("cycle in downstream pointers at node {node}")]
    CycleDetected { node: String },

    /// A downstream pointer does not resolve to a node.
    #[error("node {node} has a dangling downstream pointer: {reason}")]
    DanglingPointer { node: String, reason: Dangling },

    // ---- resource --------------------------------------------------------
    /// The trace stack could not be allocated.
    #[error("cannot allocate a trace stack of {capacity} frames")]
    StackAllocation { capacity: usize },

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    /// An output could not be written or committed.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Output serialization failed.
    #[error("failed to encode {}: {reason}", path.display())]
    EncodeFailed { path: PathBuf, reason: String },

    // ---- internal --------------------------------------------------------
    /// Two traversals claimed the same node.
    #[error("basin claim conflict at node {node}: held by {held}, claimed by {claimant}")]
    ClaimConflict {
        node: String,
        held: u32,
        claimant: u32,
    },

    /// Any other violated engine invariant.
    #[error("internal error: {0}")]
    Internal(String),

    // ---- cancellation ----------------------------------------------------
    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,
}

impl MidasError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MidasError::InvalidParameter { .. }
            | MidasError::InvalidOption { .. }
            | MidasError::DatasetNotFound(_)
            | MidasError::ReadFailed { .. }
            | MidasError::InvalidDataset { .. }
            | MidasError::LayerNotFound { .. }
            | MidasError::MissingColumn { .. }
            | MidasError::EmptyMesh { .. } => ErrorKind::Input,
            MidasError::CycleDetected { .. } | MidasError::DanglingPointer { .. } => {
                ErrorKind::StructuralIntegrity
            }
            MidasError::StackAllocation { .. }
            | MidasError::WorkerPool(_)
            | MidasError::WriteFailed { .. }
            | MidasError::EncodeFailed { .. } => ErrorKind::Resource,
            MidasError::ClaimConflict { .. } | MidasError::Internal(_) => ErrorKind::Internal,
            MidasError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns the status code reported for this error.
    pub fn status(&self) -> Status {
        self.kind().into()
    }

    /// Convenience constructor for [`MidasError::InvalidParameter`].
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        MidasError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`MidasError::InvalidDataset`].
    pub fn invalid_dataset(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MidasError::InvalidDataset {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
