//! Error types for the offload pipeline.
//!
//! Every device-API failure is fatal to the run. The variants mirror the
//! pipeline stages so that the binary can report the failing stage and
//! map each failure kind to its own process exit code.

use std::fmt;

use thiserror::Error;

use crate::config::DeviceClass;

/// Construction step of a [`crate::ComputeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextStage {
    Context,
    Queue,
    Program,
    Kernel,
}

impl fmt::Display for ContextStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Context => "context",
            Self::Queue => "command queue",
            Self::Program => "program",
            Self::Kernel => "kernel",
        })
    }
}

/// Which of the three trial vectors a device buffer mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    InputA,
    InputB,
    OutputC,
}

impl BufferRole {
    /// Short label used for device-side object names.
    pub fn label(self) -> &'static str {
        match self {
            Self::InputA => "a",
            Self::InputB => "b",
            Self::OutputC => "c",
        }
    }
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Direction of a host/device memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
        })
    }
}

/// Failures of the benchmark and its offload pipeline.
#[derive(Debug, Error)]
pub enum VaddError {
    /// The benchmark configuration cannot be executed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The platform list itself could not be retrieved.
    #[error("failed to enumerate compute platforms: {0}")]
    PlatformEnumeration(String),

    /// No platform offered a device of the requested class.
    #[error("no {class} device found on {platforms} platform(s)")]
    NoDeviceFound { class: DeviceClass, platforms: usize },

    /// A step of compute-context construction failed. For program builds
    /// the diagnostic carries the compiler log.
    #[error("{stage} build failed: {diagnostic}")]
    ContextBuild {
        stage: ContextStage,
        diagnostic: String,
    },

    #[error("failed to allocate device buffer `{buffer}`: {reason}")]
    BufferAllocation { buffer: BufferRole, reason: String },

    #[error("{direction} of buffer `{buffer}` failed: {reason}")]
    Transfer {
        direction: TransferDirection,
        buffer: BufferRole,
        reason: String,
    },

    /// Binding a kernel argument failed; the dispatch did not proceed.
    #[error("failed to bind kernel argument {argument_index}: {reason}")]
    KernelArgument { argument_index: u32, reason: String },

    #[error("kernel launch failed: {0}")]
    KernelLaunch(String),

    /// The device reported an error while or after executing the kernel.
    #[error("device execution failed: {status}")]
    DeviceExecution { status: String },

    /// An output element differs from the host-computed sum.
    #[error("result mismatch at index {index}: expected {expected}, got {actual}")]
    Verification {
        index: usize,
        expected: f32,
        actual: f32,
    },
}

/// Specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, VaddError>;

impl VaddError {
    pub(crate) fn context_build(stage: ContextStage, diagnostic: impl Into<String>) -> Self {
        Self::ContextBuild {
            stage,
            diagnostic: diagnostic.into(),
        }
    }

    /// Name of the failure kind in the error taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::PlatformEnumeration(_) => "PlatformEnumerationError",
            Self::NoDeviceFound { .. } => "NoDeviceFound",
            Self::ContextBuild { .. } => "ContextBuildError",
            Self::BufferAllocation { .. } => "BufferAllocationError",
            Self::Transfer { .. } => "TransferError",
            Self::KernelArgument { .. } | Self::KernelLaunch(_) => "KernelLaunchError",
            Self::DeviceExecution { .. } => "DeviceExecutionError",
            Self::Verification { .. } => "VerificationError",
        }
    }

    /// Human-readable name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::PlatformEnumeration(_) | Self::NoDeviceFound { .. } => "device selection",
            Self::ContextBuild { stage, .. } => match stage {
                ContextStage::Context => "context creation",
                ContextStage::Queue => "command queue creation",
                ContextStage::Program => "program build",
                ContextStage::Kernel => "kernel lookup",
            },
            Self::BufferAllocation { .. } => "buffer allocation",
            Self::Transfer { direction, .. } => match direction {
                TransferDirection::Upload => "host-to-device upload",
                TransferDirection::Download => "device-to-host download",
            },
            Self::KernelArgument { .. } => "kernel argument binding",
            Self::KernelLaunch(_) => "kernel launch",
            Self::DeviceExecution { .. } => "device execution",
            Self::Verification { .. } => "result verification",
        }
    }

    /// Process exit code reported by the `vadd` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::PlatformEnumeration(_) => 3,
            Self::NoDeviceFound { .. } => 4,
            Self::ContextBuild { stage, .. } => match stage {
                ContextStage::Context => 5,
                ContextStage::Queue => 6,
                ContextStage::Program => 7,
                ContextStage::Kernel => 8,
            },
            Self::BufferAllocation { .. } => 9,
            Self::Transfer { direction, .. } => match direction {
                TransferDirection::Upload => 10,
                TransferDirection::Download => 11,
            },
            Self::KernelArgument { .. } => 12,
            Self::KernelLaunch(_) => 13,
            Self::DeviceExecution { .. } => 14,
            Self::Verification { .. } => 15,
        }
    }
}
