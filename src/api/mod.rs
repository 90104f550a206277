//! Exchange API clients: request signing, REST, and the streaming channel.

mod rest_client;
mod signer;
mod stream;
mod types;

pub use rest_client::{ExchangeRestClient, OrderRequest};
pub use signer::{auth_payload, Signer};
pub use stream::{OpenStream, StreamSinks, TransportChannel};
pub use types::*;
