pub mod bufio;
pub mod channel;
pub mod codec;
pub mod error;
pub mod framer;
pub mod manager;
pub mod registry;
pub mod session;

pub use bufio::{BufioConfig, BufferedStream, Closable};
pub use channel::Channel;
pub use codec::{derive_type_name, ByteOrder, Codec};
pub use error::{ClientError, ProtocolError, ServerError, SessionError};
pub use framer::{FixlenCodec, FixlenConfig};
pub use manager::SessionManager;
pub use registry::{build_pipeline, build_session_codecs, register_protocol, BaseFactory, ReadWriteClosable};
pub use session::Session;
