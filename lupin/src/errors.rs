/// Failures of a latent representation run
///
/// Carried inside `anyhow::Error`; use `downcast_ref::<LupinError>()`
/// to tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum LupinError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unusable data: {0}")]
    Data(String),

    #[error("numeric instability: {0}")]
    NumericInstability(String),

    #[error("I/O failure: {0}")]
    Io(String),
}

impl LupinError {
    pub fn configuration(msg: impl Into<String>) -> anyhow::Error {
        LupinError::Configuration(msg.into()).into()
    }

    pub fn data(msg: impl Into<String>) -> anyhow::Error {
        LupinError::Data(msg.into()).into()
    }

    pub fn io(msg: impl Into<String>) -> anyhow::Error {
        LupinError::Io(msg.into()).into()
    }
}

/// Report training failures as numeric instability; anything else
/// passes through
pub fn training_error(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<candle_util::TrainError>() {
        Some(e) => LupinError::NumericInstability(e.to_string()).into(),
        None => err,
    }
}
