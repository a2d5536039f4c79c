//! JSON-RPC envelopes exchanged with the signaling server.

pub mod error;
pub mod inbound;
pub mod method;
pub mod outbound;

pub use error::{ProtocolError, ServerError, ServerErrorCode};
pub use inbound::{
    AnswerMessage, ByeMessage, InboundMessage, InviteMessage, MediaMessage, RingingMessage,
};
pub use method::SocketMethod;
pub use outbound::{
    AttachCallParams, AttachUserVariables, ByeParams, CallDialogParams, CallParams, DialogRef,
    DisablePushParams, InfoParams, LoginParams, ModifyAction, ModifyParams, OutboundRequest,
    RequestEnvelope, RequestPayload, StateParams, UserVariables, pong,
};

pub const JSON_RPC_VERSION: &str = "2.0";
