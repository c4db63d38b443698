pub mod interpreter;
pub mod messages;

pub use interpreter::{Disposition, ProtocolInterpreter, ReadOutcome};
pub use messages::{
    decode_inbound, to_data_url, AiFeedback, InboundMessage, OutboundMessage, ServerError,
    StatusUpdate,
};
