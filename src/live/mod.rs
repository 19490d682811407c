//! Live (multi-frame) recognition.
//!
//! Clients push camera frames to a session. Frames are embedded into a
//! rolling buffer; a background worker per session periodically searches
//! with a recency-weighted mean of the buffer and smooths the hits over
//! time so that predictions do not flicker between frames.
//!
//! ```text
//! frames ──▶ FrameBuffer ──(every interval)──▶ search_appearance
//!                                                   │
//!                     predictions ◀── EmaSmoother ◀─┘
//! ```

mod buffer;
mod session;
mod smoothing;

pub use buffer::FrameBuffer;
pub use session::{spawn_worker, LiveSession, LiveSessions, LiveSnapshot, LiveStatus};
pub use smoothing::{EmaSmoother, Prediction, SmoothingConfig};
