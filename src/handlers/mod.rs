//! Inbound frame dispatch.
//!
//! Every parsed [`txcore::protocol::InboundMessage`] goes through
//! [`crate::Client::route_message`]: responses wake their waiters first,
//! session traffic is handled inline and call-scoped frames are queued on the
//! worker of the call they name.

mod router;
