use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("password hashing failed: {message}")]
    Hash { message: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn hash(message: impl Into<String>) -> Self {
        Self::Hash {
            message: message.into(),
        }
    }
}

impl botherd_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

botherd_common::impl_context!();
