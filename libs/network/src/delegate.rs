//! Connection life-cycle hooks for the accepting side.

use crate::end::End;
use async_trait::async_trait;
use types::FrontierError;

/// Hooks an [`Acceptor`](crate::Acceptor) drives for every connection.
///
/// Every method has a default, so a bound implements only what it needs.
/// For one connection the calls are sequential: `get_client_id`, then
/// `connection_online`, then any number of `heartbeat` and
/// `remote_registration`, then exactly one `connection_offline`.
#[async_trait]
pub trait BoundDelegate: Send + Sync + 'static {
    /// Resolve the id of a connecting client; an error rejects the handshake
    async fn get_client_id(&self, _meta: &[u8], wanted: Option<u64>) -> Result<u64, FrontierError> {
        wanted.ok_or_else(|| FrontierError::IllegalRequest("client id required".to_string()))
    }

    /// The end is handshaken; an error closes it
    async fn connection_online(&self, _end: &End) -> Result<(), FrontierError> {
        Ok(())
    }

    async fn connection_offline(&self, _end: &End) {}

    async fn heartbeat(&self, _end: &End) {}

    /// The far side registered `method` on `stream_id`
    async fn remote_registration(&self, _end: &End, _stream_id: u64, _method: &str) {}
}
