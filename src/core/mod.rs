//! Session runtime: message store, registry and transport collaborators,
//! operator checkpoints and the session state machine.

pub mod checkpoint;
pub mod record;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transport;

pub use checkpoint::{AutoCheckpoint, Checkpoint, ConsoleCheckpoint, Prompt};
pub use record::{read_store, LogRecord, RecordError, StoreContents, HEADER};
pub use registry::{InMemoryRegistry, KeyAlgorithm, RegistryClient, RegistryError, RegistryPath};
pub use session::{Collaborators, Session, SessionError, SessionReport, SessionState};
pub use sink::{CsvMessageLogger, MemorySink, MessageSink, SinkError};
pub use transport::{GatewayTransport, MqttGatewayTransport, TransportError};
