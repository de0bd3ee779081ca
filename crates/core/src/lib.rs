//! `medrelay-core` — shared delivery primitives.
//!
//! This crate contains the data model shared by the stream relay and the job
//! queue: identifiers, protocol frames, and the delivery error taxonomy. It has
//! no IO.

pub mod error;
pub mod frame;
pub mod id;

pub use error::{DeliveryError, DeliveryResult, FailureClass};
pub use frame::{Frame, FrameStatus, Metadata};
pub use id::{JobId, MessageId};
