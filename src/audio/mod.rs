//! Audio capture and frame plumbing
//!
//! Frames flow from the cpal callback through a bounded [`FrameQueue`] to the
//! pipeline's single consumer loop; nothing downstream touches the capture
//! buffer directly.

mod capture;
mod frame;
mod queue;
mod wav;

pub use capture::{AudioCapture, input_devices};
pub use frame::{AudioFrame, calculate_rms};
pub use queue::FrameQueue;
pub use wav::samples_to_wav;
