mod document_store;
mod transport;

pub use document_store::DocumentStore;
pub use transport::{MessageHandler, Transport, TransportError};
