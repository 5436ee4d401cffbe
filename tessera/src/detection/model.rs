use common::Buffer2;

use crate::error::Result;

/// Result of one inference call.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// One output image per input image.
    Batch(Vec<Buffer2<f32>>),
    /// Several output heads, each a batch. The first head is used, at half
    /// the input resolution.
    Heads(Vec<Vec<Buffer2<f32>>>),
}

/// Image-to-image network treated as a black box.
pub trait InferenceModel: Send + Sync {
    /// True when the model takes the whole projection instead of fixed-size tiles.
    fn expects_single_image(&self) -> bool {
        false
    }

    fn predict(&self, batch: &[Buffer2<f32>]) -> Result<ModelOutput>;
}

/// Returns its input unchanged. With binary mode it thresholds the
/// normalised projection directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityModel {
    pub single_image: bool,
}

impl InferenceModel for IdentityModel {
    fn expects_single_image(&self) -> bool {
        self.single_image
    }

    fn predict(&self, batch: &[Buffer2<f32>]) -> Result<ModelOutput> {
        Ok(ModelOutput::Batch(batch.to_vec()))
    }
}
