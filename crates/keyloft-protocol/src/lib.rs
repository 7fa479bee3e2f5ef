pub mod codec;
pub mod ensemble;
pub mod envelope;
pub mod error;
pub mod fragmentation;
pub mod messages;
pub mod profiles;

pub use codec::{Decoder, Encoder};
pub use ensemble::PrekeyEnsemble;
pub use error::{ProfileFault, ProtocolError};
pub use fragmentation::Assembler;
pub use messages::{MessageType, PROTOCOL_VERSION};
pub use profiles::{ClientProfile, PrekeyProfile};
