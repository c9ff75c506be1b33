/// High-level response after a surface error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface was reconfigured; rendering may resume next frame.
    Reconfigured,
    /// Transient error; skip the current frame.
    SkipFrame,
    /// Fatal error (commonly OOM); the target stays blank.
    Fatal,
}

/// Why a shader could not be turned into a program.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    /// WGSL parse failure, rendered with source context.
    #[error("{stage} stage failed to parse:\n{diagnostic}")]
    Parse {
        stage: &'static str,
        diagnostic: String,
    },

    #[error("{stage} stage failed validation:\n{diagnostic}")]
    Validation {
        stage: &'static str,
        diagnostic: String,
    },

    #[error("{stage} stage has no {stage} entry point")]
    MissingEntryPoint { stage: &'static str },

    /// Accepted by naga but rejected by the device.
    #[error("device rejected shader module: {0}")]
    Device(String),
}
