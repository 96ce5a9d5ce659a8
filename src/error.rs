//! Error taxonomy. Narrower than the teacher's HTTP-status-carrying
//! `AppError` because the client API never surfaces a non-200 status for
//! a logical failure (spec §6.3/§7): those are `CommandResult` values.
//! `BrokerError` exists only for the two failure classes that have no
//! place in a response body — fatal startup misconfiguration, and
//! transport failures the engine already swallows after logging.

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),
}
