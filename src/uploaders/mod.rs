pub mod http;
mod progress_stream;

pub use http::{open_stream, FileStream, HttpTransport, HttpTransportConfig};
pub use progress_stream::ProgressStream;
