use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Converts one input array file into the output tree rooted at `output_root`.
///
/// Implementations signal failure through the returned error; the dispatcher
/// records it and decides whether to continue.
#[async_trait]
pub trait ConverterPort: Send + Sync {
    async fn convert(&self, output_root: &Path, input_path: &Path) -> Result<()>;
}
