use async_trait::async_trait;

use crate::LinkError;

/// A service whose lifetime follows the link: started when an address
/// is acquired, stopped when the station drops. Both calls must be
/// idempotent; the supervisor never relies on the service to remember
/// what it was last asked to do.
#[async_trait]
pub trait LinkService: Send {
    async fn start(&mut self) -> Result<(), LinkError>;

    async fn stop(&mut self) -> Result<(), LinkError>;

    /// Used in log messages
    fn name(&self) -> &'static str;
}

/// The wireless station as seen by the supervisor. Implementations report
/// progress back through a [`crate::NetEventSender`]; `request_association`
/// itself must return promptly and never wait for the join to complete.
pub trait StationDriver: Send {
    fn request_association(&mut self) -> Result<(), LinkError>;
}
