/// Result alias that carries the custom [`RigError`] type.
pub type Result<T> = std::result::Result<T, RigError>;

/// Common error type for the core crate.
///
/// Nothing on the per-frame path returns this type. It is produced by the
/// set-up and decoding entry points (config, strict timing parsers, spectrum
/// planning) and recovered locally wherever the animation loop is involved.
#[derive(Debug, thiserror::Error)]
pub enum RigError {
    /// Free-form message for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Input that was structurally present but unusable.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// JSON decoding failure for configs and external timing files.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Failure reported by the FFT backend.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl RigError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for RigError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for RigError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
