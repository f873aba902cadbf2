//! Serial command interface: frame codec, message types, and the dispatcher.

pub mod codec;
pub mod dispatcher;
pub mod messages;
