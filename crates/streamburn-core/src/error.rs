use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamBurnError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Pipeline construction failed on {device} at {streams} streams: {message}")]
    InstanceConstruction {
        device: String,
        streams: u32,
        message: String,
    },

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Result log write failed: {0}")]
    LogWrite(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StreamBurnError>;
