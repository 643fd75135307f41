pub mod clock;
pub mod config;
pub mod export;
pub mod reader;
pub mod report;
pub mod selector;
pub mod session;
pub mod transport;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    Config, DeviceConfig, OutputConfig, ProtocolConfig, SelectionConfig, SessionConfig,
    TransportConfig,
};
pub use export::RecordSink;
pub use export::csv::CsvSink;
pub use export::memory::MemorySink;
pub use reader::{ReadReport, Reader, ReaderError};
pub use selector::{Choice, DeviceSelector, FixedDevice, ScanSelector};
pub use session::{Acquisition, Session, SessionError, SessionOutcome, SessionState};
pub use transport::mock::{MockScript, MockTransport};
pub use transport::{Connection, ConnectionError, DiscoveredDevice, Transport, TransportError};
