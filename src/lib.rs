//! Batch dispatcher for MODIS swath arrays.
//!
//! Walks `<input>/<sample>/<category>/MYD021KM*.npy` and hands every match to
//! an external converter as `(output_root, input_path)`.

pub mod app;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod infra;
pub mod observability;

pub use app::dispatcher::BatchDispatcher;
pub use app::ports::ConverterPort;
pub use app::report::DispatchReport;
pub use config::{DispatchConfig, ErrorPolicy};
pub use error::{DispatchError, Result};
