// rehau-bridge-api: MQTT sessions and wire types for the REHAU NEA SMART bridge

pub mod error;
pub mod installation;
pub mod referential;
pub mod session;
pub mod vendor;

pub use error::Error;
pub use installation::{InstallationClient, InstallationTree, RawChannel, RawInstallation, RawZone};
pub use referential::ReferentialEntry;
pub use session::{
    CredentialSource, Credentials, InboundMessage, Link, MqttSession, MqttTransport, SessionConfig,
    SessionStatus, StaticCredentials, TransportKind,
};
pub use vendor::{VendorMessage, VendorRequest, WriteField, WriteRequest};
