pub mod classifier;
pub mod progress;

pub use classifier::{extract_error_code, is_retryable, user_message};
pub use progress::{format_duration, format_file_size, format_speed, ProgressSnapshot, SampleWindow};
