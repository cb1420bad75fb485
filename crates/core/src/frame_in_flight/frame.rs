use crate::frame_in_flight::FRAMES_LIMIT;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering::Relaxed;

/// Identifies one frame slot of a [`SeedInFlight`]. See [mod](super) for docs.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct FrameInFlight<'a> {
	seed: SeedInFlight,
	slot: u8,
	phantom: PhantomData<&'a ()>,
}

impl FrameInFlight<'_> {
	/// A `FrameInFlight` grants access to per-slot resources that may still be used by the GPU, so it is usually only
	/// handed to a closure it can't escape from, enforced by the otherwise unused lifetime. Safe ways to get one:
	/// * [`ResourceInFlight::new`], for accessing other `ResourceInFlight`s of the same slot during construction.
	/// * [`GpuContext::with_frame_in_flight`] for the frame currently being recorded.
	///
	/// # Safety
	/// The slot must not be in use by the GPU while resources are accessed through it.
	///
	/// [`ResourceInFlight::new`]: crate::frame_in_flight::ResourceInFlight::new
	/// [`GpuContext::with_frame_in_flight`]: crate::context::GpuContextInner::with_frame_in_flight
	#[inline]
	pub unsafe fn new(seed: impl Into<SeedInFlight>, slot: u32) -> Self {
		let seed = seed.into();
		assert!(
			slot < seed.frames_in_flight(),
			"frame slot {} out of bounds of {:?}",
			slot,
			seed
		);
		FrameInFlight {
			seed,
			slot: slot as u8,
			phantom: PhantomData,
		}
	}

	#[inline]
	pub fn frame_index(&self) -> usize {
		self.slot as usize
	}

	#[inline]
	pub fn seed(&self) -> SeedInFlight {
		self.seed
	}
}

impl Debug for FrameInFlight<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameInFlight")
			.field("id", &self.seed.id)
			.field("slot", &self.slot)
			.field("frames_in_flight", &self.seed.frames)
			.finish()
	}
}

impl From<FrameInFlight<'_>> for usize {
	fn from(value: FrameInFlight) -> Self {
		value.frame_index()
	}
}

impl From<&FrameInFlight<'_>> for SeedInFlight {
	fn from(value: &FrameInFlight<'_>) -> Self {
		value.seed()
	}
}

/// How many frames may be in flight, tagged with an id unique to its owner so that a [`FrameInFlight`] of one
/// [`GpuContext`](crate::context::GpuContext) can't index the resources of another.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeedInFlight {
	id: u16,
	frames: u8,
}

impl SeedInFlight {
	/// # Panics
	/// If `frames_in_flight` is 0 or exceeds [`FRAMES_LIMIT`].
	#[must_use]
	pub fn new(frames_in_flight: u32) -> Self {
		static NEXT_ID: AtomicU16 = AtomicU16::new(0);
		assert!(
			(1..=FRAMES_LIMIT).contains(&frames_in_flight),
			"frames_in_flight must be within 1..={}, got {}",
			FRAMES_LIMIT,
			frames_in_flight
		);
		Self {
			id: NEXT_ID.fetch_add(1, Relaxed),
			frames: frames_in_flight as u8,
		}
	}

	/// Iterates all slots of this seed.
	///
	/// # Safety
	/// The returned FrameInFlights may be used to access any ResourceInFlight, of which some slots may be in use.
	pub unsafe fn iter(&self) -> impl Iterator<Item = FrameInFlight<'static>> {
		let seed = *self;
		(0..self.frames_in_flight()).map(move |slot| unsafe { FrameInFlight::new(seed, slot) })
	}

	/// Maps an ever increasing frame number onto the slot it occupies.
	#[inline]
	pub fn slot_of(&self, frame_number: u64) -> u32 {
		(frame_number % self.frames as u64) as u32
	}

	#[inline]
	pub fn frames_in_flight(&self) -> u32 {
		self.frames as u32
	}
}

impl Debug for SeedInFlight {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SeedInFlight")
			.field("id", &self.id)
			.field("frames_in_flight", &self.frames)
			.finish()
	}
}
