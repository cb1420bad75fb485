use crate::frame_in_flight::{FrameInFlight, SeedInFlight};

/// One `T` per frame slot of a [`SeedInFlight`], indexed by the [`FrameInFlight`] of that slot.
///
/// Indexing is done with fn's instead of the [`Index`](core::ops::Index) trait, as the returned `&T` must also be
/// bound to the lifetime of the [`FrameInFlight`], which the trait can't express.
#[derive(Debug)]
pub struct ResourceInFlight<T> {
	slots: Box<[T]>,
	seed: SeedInFlight,
}

impl<T> ResourceInFlight<T> {
	/// Calls `f` for each slot of `seed` in order.
	#[must_use]
	pub fn new(seed: impl Into<SeedInFlight>, mut f: impl FnMut(FrameInFlight) -> T) -> Self {
		match Self::try_new(seed, |fif| Ok::<_, std::convert::Infallible>(f(fif))) {
			Ok(resource) => resource,
			Err(infallible) => match infallible {},
		}
	}

	/// Like [`Self::new`] but `f` may fail, the first error is returned and slots created so far are dropped.
	pub fn try_new<E>(seed: impl Into<SeedInFlight>, f: impl FnMut(FrameInFlight) -> Result<T, E>) -> Result<Self, E> {
		let seed = seed.into();
		// SAFETY: nothing is in flight before the resource exists
		let slots = unsafe { seed.iter() }.map(f).collect::<Result<_, E>>()?;
		Ok(Self { slots, seed })
	}

	#[inline]
	pub fn seed(&self) -> SeedInFlight {
		self.seed
	}

	/// All slots regardless of whether they are in flight, for teardown and statistics.
	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.slots.iter()
	}

	/// # Panics
	/// If `fif` belongs to a different seed.
	#[inline]
	pub fn index<'a>(&'a self, fif: FrameInFlight<'a>) -> &'a T {
		assert_eq!(self.seed, fif.seed(), "FrameInFlight of a foreign seed");
		&self.slots[fif.frame_index()]
	}

	#[inline]
	pub fn index_mut<'a>(&'a mut self, fif: FrameInFlight<'a>) -> &'a mut T {
		assert_eq!(self.seed, fif.seed(), "FrameInFlight of a foreign seed");
		&mut self.slots[fif.frame_index()]
	}
}

impl<T> From<&ResourceInFlight<T>> for SeedInFlight {
	fn from(value: &ResourceInFlight<T>) -> Self {
		value.seed()
	}
}
