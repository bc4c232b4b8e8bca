/// Reasons a message cannot be sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("message is empty")]
    EmptyMessage,

    #[error("no active session")]
    NoSession,

    /// A reply is still streaming; wait for it or cancel it first.
    #[error("a reply is still in progress")]
    TurnInFlight,
}

pub type Result<T> = std::result::Result<T, Error>;
