/// Error taxonomy for the archiver.
///
/// The API adapter maps transport-specific failures into this type so the
/// aggregation core can distinguish a rejected credential from a flaky
/// network from a malformed record.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential rejected by the API")]
    Auth,

    #[error("group not found: {group_id}")]
    NotFound { group_id: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed record: {0}")]
    Data(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
