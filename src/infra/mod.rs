pub mod process_converter;

pub use process_converter::ProcessConverter;
