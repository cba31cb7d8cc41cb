//! Pluggable send/recv frame recorder, generalizing the original driver's
//! `logfile` constructor argument into a trait external callers can adapt
//! to whatever format they need (the original wrote a fixed two-column
//! timestamp/hex-bytes text file; that formatting stays outside this crate).

/// Direction of a recorded frame, relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Sent,
	Received,
}

/// Receives a copy of every frame that crosses the wire.
pub trait DebugSink {
	fn record(&mut self, direction: Direction, frame: &[u8]);
}

/// Default sink: discards everything. Used when a [`crate::session::Session`]
/// is opened without a `logfile`/sink supplied.
#[derive(Debug, Default)]
pub struct NullSink;

impl DebugSink for NullSink {
	fn record(&mut self, _direction: Direction, _frame: &[u8]) {}
}
