//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`EmberError`] covers the recoverable failure modes:
//! - GPU adapter, device and surface initialization failures
//! - Shader discovery and compilation errors
//! - Framebuffer completeness reports (probe API only)
//! - Configuration loading errors
//!
//! Programming errors (unknown resource handles, incomplete framebuffers at
//! construction, device memory exhaustion) are not represented here: they are
//! logged and abort at the point of detection.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, EmberError>`.
//!
//! ```rust,ignore
//! use ember::errors::{EmberError, Result};
//!
//! fn load() -> Result<()> {
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::renderer::core::framebuffer::FramebufferStatus;

/// The main error type for the Ember engine.
#[derive(Error, Debug)]
pub enum EmberError {
    // ========================================================================
    // GPU & Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// Failed to create or configure the presentation surface.
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// The device refused an allocation.
    #[error("Out of device memory: requested {requested} bytes for '{label}'")]
    OutOfDeviceMemory {
        /// Debug label of the object being allocated
        label: String,
        /// Requested allocation size in bytes
        requested: u64,
    },

    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// No stage source file matched the program name.
    #[error("No shader stages found for '{program}' in {}", dir.display())]
    ShaderNotFound {
        /// Program base name
        program: String,
        /// Directory that was scanned
        dir: PathBuf,
    },

    /// The discovered stage set cannot form a program.
    #[error("Invalid stage set for shader '{program}': {reason}")]
    InvalidProgramStages {
        /// Program base name
        program: String,
        /// Which rule was violated
        reason: String,
    },

    /// A stage failed to compile or the program failed to link.
    #[error("Shader '{program}' failed to compile:\n{log}")]
    ShaderCompile {
        /// Program base name
        program: String,
        /// Diagnostic text reported by the backend
        log: String,
    },

    /// The `Uniforms` block declared by a program is not representable.
    #[error("Uniform layout error in '{program}': {message}")]
    UniformLayout {
        /// Program base name
        program: String,
        /// Description of the offending member
        message: String,
    },

    // ========================================================================
    // Render Target Errors
    // ========================================================================
    /// A framebuffer's attachment set does not form a complete render target.
    #[error("Framebuffer '{label}' is incomplete: {status}")]
    IncompleteFramebuffer {
        /// Debug label of the framebuffer
        label: String,
        /// The first completeness rule that failed
        status: FramebufferStatus,
    },

    // ========================================================================
    // I/O & Configuration Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Alias for `Result<T, EmberError>`.
pub type Result<T> = std::result::Result<T, EmberError>;
