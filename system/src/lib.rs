mod client_replica;
pub mod codec;
mod message;
mod operation;
mod operation_log;
mod room_state;
mod types;
mod undo_stack;

pub use client_replica::*;
pub use message::*;
pub use operation::*;
pub use operation_log::*;
pub use room_state::*;
pub use types::*;
pub use undo_stack::*;

pub extern crate bincode;
pub extern crate serde;
pub extern crate serde_json;
pub extern crate uuid;
