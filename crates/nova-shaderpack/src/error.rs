//! Shaderpack loading errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading a shaderpack or its resources.
#[derive(Error, Debug)]
pub enum ShaderpackError {
    /// A file could not be read
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON file did not parse
    #[error("Could not parse {file}: {source}")]
    Json {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The zip archive is unreadable
    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// No root has the requested file
    #[error("Resource {0} does not exist")]
    MissingFile(PathBuf),

    /// No folder or zip archive exists for the shaderpack
    #[error("Shaderpack {0} not found")]
    ShaderpackNotFound(PathBuf),

    /// None of the stage's SPIR-V file names exist
    #[error("Pipeline {pipeline} names shader {filename}, but no SPIR-V file for it exists")]
    ShaderNotFound { pipeline: String, filename: PathBuf },

    /// SPIR-V files are a whole number of 32-bit words
    #[error("{path} is {len} bytes long, which is not a whole number of SPIR-V words")]
    InvalidSpirv { path: PathBuf, len: usize },

    /// SPIR-V modules open with a five-word header led by the magic number
    #[error("{path} does not start with a SPIR-V header")]
    MissingSpirvHeader { path: PathBuf },

    /// A text file is not valid UTF-8
    #[error("{0} is not valid UTF-8")]
    NotUtf8(PathBuf),

    /// An image could not be decoded
    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),
}

/// Result type alias using [`ShaderpackError`].
pub type Result<T> = std::result::Result<T, ShaderpackError>;
