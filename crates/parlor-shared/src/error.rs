use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelNameError {
    #[error("Channel name is empty")]
    Empty,

    #[error("Channel name is {len} characters long (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Channel name contains invalid character {0:?}")]
    InvalidCharacter(char),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
