mod memory_document_store;
mod memory_transport;
mod sqlite_document_store;

pub use memory_document_store::MemoryDocumentStore;
pub use memory_transport::{
    decode_frame, encode_request, encode_response, Frame, HandlerRegistry, MemoryNetwork,
    MemoryTransport, DEFAULT_REQUEST_TIMEOUT,
};
pub use sqlite_document_store::{SqliteDocumentStore, DOCUMENT_KEY};
