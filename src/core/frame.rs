//! N-buffered slot bookkeeping.
//!
//! Every ping-pong or triple-buffered GPU array picks its slot through the
//! types in this module, so the index arithmetic lives in one place.

/// Cyclic index over `N` buffer slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ring<const N: usize> {
    index: usize,
}

impl<const N: usize> Ring<N> {
    /// Number of slots
    pub const LEN: usize = N;

    /// Ring positioned at slot 0
    pub const fn new() -> Self {
        Self { index: 0 }
    }

    /// Ring positioned at `index mod N`
    pub const fn at(index: usize) -> Self {
        Self { index: index % N }
    }

    /// Slot written this frame
    #[inline]
    pub const fn current(&self) -> usize {
        self.index
    }

    /// Slot written by the previous frame
    #[inline]
    pub const fn previous(&self) -> usize {
        (self.index + N - 1) % N
    }

    /// Slot the next frame will write
    #[inline]
    pub const fn next(&self) -> usize {
        (self.index + 1) % N
    }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.index = self.next();
    }
}

/// Two-slot ring used for read/write ping-pong
pub type PingPong = Ring<2>;

/// Slot roles of a triple-buffered simulation array.
///
/// Slots 0 and 1 alternate as In and Out. Slot 2 is the stable Read copy
/// refreshed after each step and never written by the step itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepSlots {
    parity: PingPong,
}

impl StepSlots {
    /// Index of the Read copy
    pub const READ: usize = 2;
    /// Total slot count
    pub const LEN: usize = 3;

    pub const fn new() -> Self {
        Self { parity: PingPong::new() }
    }

    /// Slot read by this step
    #[inline]
    pub const fn input(&self) -> usize {
        self.parity.current()
    }

    /// Slot written by this step
    #[inline]
    pub const fn output(&self) -> usize {
        self.parity.next()
    }

    /// Stable copy for consumers racing the next step
    #[inline]
    pub const fn read(&self) -> usize {
        Self::READ
    }

    /// Swap In and Out after a step
    pub fn flip(&mut self) {
        self.parity.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_never_equals_current() {
        fn check<const N: usize>() {
            for i in 0..N * 3 {
                let ring = Ring::<N>::at(i);
                assert_ne!(ring.previous(), ring.current(), "N={} i={}", N, i);
                assert_eq!(ring.previous(), (i + N - 1) % N);
            }
        }
        check::<2>();
        check::<3>();
        check::<4>();
    }

    #[test]
    fn test_advance_wraps() {
        let mut ring = Ring::<3>::new();
        let seen: Vec<usize> = (0..6)
            .map(|_| {
                let c = ring.current();
                ring.advance();
                c
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_next_of_previous_is_current() {
        for i in 0..3 {
            let ring = Ring::<3>::at(i);
            assert_eq!(Ring::<3>::at(ring.previous()).next(), ring.current());
        }
    }

    #[test]
    fn test_read_slot_stable_and_distinct() {
        let mut slots = StepSlots::new();
        for _ in 0..8 {
            assert_ne!(slots.input(), slots.output());
            assert_ne!(slots.read(), slots.input());
            assert_ne!(slots.read(), slots.output());
            assert_eq!(slots.read(), StepSlots::READ);
            slots.flip();
        }
    }

    #[test]
    fn test_flip_swaps_in_and_out() {
        let mut slots = StepSlots::new();
        let (i, o) = (slots.input(), slots.output());
        slots.flip();
        assert_eq!(slots.input(), o);
        assert_eq!(slots.output(), i);
    }
}
