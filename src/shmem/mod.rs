//! Shared-memory input state for native and WASM plugin clients.
//!
//! A region is a lock word followed by a fixed byte layout (see [`layout`]).
//! The host side holds an [`InputStateWriter`], the client an
//! [`InputStateReader`]; both only touch data while holding a
//! [`MemoryGuard`], which releases the lock when dropped.

mod bridge;
mod futex;
pub mod layout;
mod region;
mod state;

pub use bridge::SharedMemoryBridge;
pub use layout::{Field, Spinner, CLASSIC_DATA_LEN, DATA_OFFSET, SPINNER_DATA_LEN};
pub use region::{LockState, MemoryGuard, Role, SharedRegion};
pub use state::{ControllerState, InputStateReader, InputStateWriter, SpinnerState};
