//! # Frame in flight
//! The frame in flight system consists out of 3 main components:
//! * `SeedInFlight`: The seed is the configuration of the frame in flight system and ensures different seeds are not
//!   mixed or matched. To construct it you must pass the amount of frames that may be in flight at maximum, so that
//!   other systems can allocate enough resources to support that many frames in flight. The maximum may also not exceed
//!   the `FRAMES_LIMIT` of 3.
//! * `FrameInFlight`: The slot of the frame that is currently in flight. It is constructed via `new()` from a seed and
//!   the slot it should represent, which is marked unsafe as one needs to ensure two frames in flight with the same
//!   slot are never executing at the same time.
//! * `ResourceInFlight`: A resource that is allocated once per slot. `FrameInFlight` may be used to index into it to
//!   get the resource to be used for that particular frame.
//!
//! Every component stores the seed it was constructed with and asserts it on access, so a `FrameInFlight` of one
//! context can't index the resources of another.
//!
//! Resources that must outlive the frame they were retired in go through the [`DeferredReleaseQueue`], short-lived
//! per-frame data through a [`FrameArena`].

mod deferred;
mod frame;
mod frame_arena;
mod resource;

pub use deferred::*;
pub use frame::*;
pub use frame_arena::*;
pub use resource::*;

pub const FRAMES_LIMIT: u32 = 3;
