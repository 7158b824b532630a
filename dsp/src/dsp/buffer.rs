//! Ping-pong buffer between a PDM capture engine and the processing chain.
//!
//! The capture engine fills one half while software consumes the other. When
//! a half is full the engine calls [`PdmDoubleBuffer::signal`], which flips the
//! producer to the other half and hands the completed one to a
//! [`CaptureHandler`]. Processing runs synchronously inside that call and must
//! finish before the new producer half fills up, i.e. within
//! [`HalfReady::deadline`]. Overruns are not detected.

use core::time::Duration;

use log::info;

use crate::config::CaptureConfig;
use crate::error::{ConfigError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Half {
    First,
    Second,
}

impl Half {
    fn other(self) -> Self {
        match self {
            Half::First => Half::Second,
            Half::Second => Half::First,
        }
    }
}

/// Which notification completed a half
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The first half of the buffer is full
    HalfComplete,
    /// The second half is full and capture wrapped to the start
    FullComplete,
}

/// A completed half, lent to the handler for the duration of one callback
#[derive(Debug)]
pub struct HalfReady<'a> {
    data: &'a [u8],
    event: CaptureEvent,
    index: u32,
    deadline: Duration,
}

impl<'a> HalfReady<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn event(&self) -> CaptureEvent {
        self.event
    }

    /// Sequence number of this chunk, counting from zero
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Real time available before the other half completes
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Receives completed halves in strict alternation
pub trait CaptureHandler {
    fn on_half_ready(&mut self, chunk: HalfReady<'_>);
    fn on_full_ready(&mut self, chunk: HalfReady<'_>);
}

pub struct PdmDoubleBuffer {
    storage: Vec<u8>,
    half_len: usize,
    producer: Half,
    index: u32,
    deadline: Duration,
}

impl PdmDoubleBuffer {
    pub fn new(half_len: usize, deadline: Duration) -> Result<Self> {
        if half_len == 0 {
            return Err(ConfigError::EmptyChunk);
        }
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(2 * half_len)
            .map_err(|_| ConfigError::resource_exhausted("PDM double buffer"))?;
        storage.resize(2 * half_len, 0);
        Ok(Self {
            storage,
            half_len,
            producer: Half::First,
            index: 0,
            deadline,
        })
    }

    /// Size both halves for one chunk of the given capture session
    pub fn from_capture(config: &CaptureConfig) -> Result<Self> {
        let half_len = config.bytes_per_chunk()?;
        let deadline = Duration::from_millis(config.ms_per_chunk as u64);
        info!("Double buffer: 2 x {} bytes, {:?} per half", half_len, deadline);
        Self::new(half_len, deadline)
    }

    pub fn half_len(&self) -> usize {
        self.half_len
    }

    pub fn producer_half(&self) -> Half {
        self.producer
    }

    /// The half the capture engine is currently allowed to write
    pub fn producer_region(&mut self) -> &mut [u8] {
        let range = self.range(self.producer);
        &mut self.storage[range]
    }

    /// Mark the producer half complete, give ownership of it to `handler` and
    /// move the producer to the other half.
    pub fn signal<H>(&mut self, handler: &mut H)
    where
        H: CaptureHandler + ?Sized,
    {
        let completed = self.producer;
        self.producer = completed.other();
        let index = self.index;
        self.index = self.index.wrapping_add(1);

        let range = self.range(completed);
        let event = match completed {
            Half::First => CaptureEvent::HalfComplete,
            Half::Second => CaptureEvent::FullComplete,
        };
        let chunk = HalfReady {
            data: &self.storage[range],
            event,
            index,
            deadline: self.deadline,
        };
        match event {
            CaptureEvent::HalfComplete => handler.on_half_ready(chunk),
            CaptureEvent::FullComplete => handler.on_full_ready(chunk),
        }
    }

    fn range(&self, half: Half) -> core::ops::Range<usize> {
        match half {
            Half::First => 0..self.half_len,
            Half::Second => self.half_len..2 * self.half_len,
        }
    }
}
