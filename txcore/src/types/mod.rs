pub mod call;
pub mod events;
pub mod gateway;
pub mod push;
