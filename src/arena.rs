
//! Two-phase bump allocation of line storage.
//!
//! All line buffers of a processing tree first _reserve_ their storage while the tree is built.
//! The arena is then finalized, which performs at most one real heap allocation,
//! after which each reservation is _materialized_ into a slice of the committed buffer.
//! Storage is never returned individually. Instead, the whole arena is `restart`ed
//! for the next image or tile, keeping the committed buffer if it is large enough.
//!
//! Materialized slices borrow the arena mutably, so restarting the arena
//! while any line of a bound tree is still alive does not compile.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result, UnitResult};
use crate::math::RoundingMode;


/// Every materialized slice starts at a multiple of this many bytes.
pub const ALIGNMENT: usize = 16;

/// The unit of storage handed out by the arena.
/// Line buffers reinterpret slices of chunks as their sample type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, align(16))]
pub struct Chunk([u8; ALIGNMENT]);

/// A storage request that has been accounted for, but not yet backed by memory.
/// Obtain with `SampleArena::reserve`, redeem with `Materializer::materialize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    generation: u64,
    chunk_offset: usize,
    chunk_count: usize,
}

/// Owns the committed sample memory of one or more processing trees.
/// Pass it by reference to every tree constructor that should share it.
#[derive(Debug, Default)]
pub struct SampleArena {
    buffer: Vec<Chunk>,
    reserved_chunks: usize,
    finalized: bool,

    /// Incremented on every restart, invalidating older reservations.
    generation: u64,

    /// Number of times `finalize` had to allocate a new buffer.
    allocation_count: usize,
}

/// Hands out the committed memory of a finalized arena, one reservation after another.
/// Reservations must be materialized in the same order they were made.
#[derive(Debug)]
pub struct Materializer<'a> {
    remaining: &'a mut [Chunk],
    chunk_cursor: usize,
    generation: u64,
}


impl Reservation {

    /// The number of bytes that this reservation occupies, including alignment padding.
    pub fn byte_count(&self) -> usize { self.chunk_count * ALIGNMENT }
}

impl SampleArena {

    /// Create an empty arena in its reservation phase. Does not allocate.
    pub fn new() -> Self { Self::default() }

    /// Account for `byte_count` bytes of storage, rounded up to the alignment.
    /// Errors if the arena has already been finalized in this cycle.
    pub fn reserve(&mut self, byte_count: usize) -> Result<Reservation> {
        if self.finalized {
            return Err(Error::contract("cannot reserve memory after the arena was finalized"));
        }

        let chunk_count = RoundingMode::Up.divide(byte_count, ALIGNMENT);
        let reservation = Reservation {
            generation: self.generation,
            chunk_offset: self.reserved_chunks,
            chunk_count
        };

        self.reserved_chunks = self.reserved_chunks.checked_add(chunk_count)
            .ok_or_else(|| Error::resource("total arena reservation overflows"))?;

        Ok(reservation)
    }

    /// Close the reservation phase and commit memory for all reservations.
    /// Allocates only if the reservations exceed the previously committed buffer,
    /// otherwise the existing buffer is reused as is.
    pub fn finalize(&mut self) -> UnitResult {
        if self.finalized {
            return Err(Error::contract("arena is already finalized"));
        }

        if self.reserved_chunks > self.buffer.len() {
            let mut buffer = Vec::new();

            buffer.try_reserve_exact(self.reserved_chunks).map_err(|_| Error::resource(format!(
                "cannot allocate {} bytes of sample memory", self.reserved_chunks * ALIGNMENT
            )))?;

            buffer.resize(self.reserved_chunks, Chunk::zeroed());
            self.buffer = buffer; // the previous buffer is dropped here
            self.allocation_count += 1;

            tracing::debug!(bytes = self.capacity_bytes(), "committed new sample arena buffer");
        }
        else {
            tracing::debug!(
                reserved = self.reserved_bytes(), capacity = self.capacity_bytes(),
                "reusing sample arena buffer"
            );
        }

        self.finalized = true;
        Ok(())
    }

    /// Start handing out committed memory. Errors if the arena is not finalized.
    /// The returned slices stay borrowed from this arena until they are dropped.
    pub fn materializer(&mut self) -> Result<Materializer<'_>> {
        if !self.finalized {
            return Err(Error::contract("arena must be finalized before line buffers can be bound"));
        }

        Ok(Materializer {
            remaining: &mut self.buffer[.. self.reserved_chunks],
            chunk_cursor: 0,
            generation: self.generation,
        })
    }

    /// Invalidate all reservations and begin a new reservation phase.
    /// The committed buffer is kept for the next cycle.
    pub fn restart(&mut self) {
        self.reserved_chunks = 0;
        self.finalized = false;
        self.generation += 1;
    }

    /// Whether the reservation phase of this cycle is closed.
    pub fn is_finalized(&self) -> bool { self.finalized }

    /// Bytes reserved in the current cycle.
    pub fn reserved_bytes(&self) -> usize { self.reserved_chunks * ALIGNMENT }

    /// Bytes of heap memory currently committed.
    /// Either grows or stays the same across cycles.
    pub fn capacity_bytes(&self) -> usize { self.buffer.len() * ALIGNMENT }

    /// How many times `finalize` had to allocate, over the lifetime of this arena.
    pub fn allocation_count(&self) -> usize { self.allocation_count }
}

impl<'a> Materializer<'a> {

    /// Back the reservation with committed memory.
    /// Errors if the reservation is from an earlier cycle or out of order.
    pub fn materialize(&mut self, reservation: Reservation) -> Result<&'a mut [Chunk]> {
        if reservation.generation != self.generation {
            return Err(Error::contract("reservation was made before the arena was restarted"));
        }

        if reservation.chunk_offset != self.chunk_cursor {
            return Err(Error::contract("line buffers must be bound in the order they were declared"));
        }

        if reservation.chunk_count > self.remaining.len() {
            return Err(Error::resource("reservation exceeds the committed arena buffer"));
        }

        let (materialized, remaining) = std::mem::take(&mut self.remaining)
            .split_at_mut(reservation.chunk_count);

        self.remaining = remaining;
        self.chunk_cursor += reservation.chunk_count;
        Ok(materialized)
    }

    /// Committed bytes that have not been handed out yet.
    pub fn remaining_bytes(&self) -> usize { self.remaining.len() * ALIGNMENT }
}
