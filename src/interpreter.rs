use crate::assets::AssetResolver;
use crate::types::{AnalysisResult, Prediction, Result, UploadError, UploadResponse};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Turns a successful response body into domain results: ranked predictions,
/// the resolved segmented-image URL and the related-asset gallery.
pub struct ResponseInterpreter {
    backend_origin: Url,
    assets: Arc<dyn AssetResolver>,
}

impl ResponseInterpreter {
    pub fn new(backend_url: &str, assets: Arc<dyn AssetResolver>) -> Self {
        let backend_origin = Url::parse(backend_url).expect("Invalid backend URL");
        Self {
            backend_origin,
            assets,
        }
    }

    pub async fn interpret(&self, body: UploadResponse) -> Result<AnalysisResult> {
        let predictions = body.predictions.ok_or(UploadError::MalformedResponse)?;
        let predictions = normalize_probabilities(predictions);
        let highest = highest_prediction(&predictions);

        let segmented_image_url = match body.segmented_image {
            Some(path) => match self.backend_origin.join(&path) {
                Ok(url) => Some(url.to_string()),
                Err(e) => {
                    warn!("Ignoring unresolvable segmented image path '{}': {}", path, e);
                    None
                }
            },
            None => {
                debug!("No segmented image in response");
                None
            }
        };

        let related_images = match &highest {
            Some(prediction) => match self.assets.resolve(&prediction.class).await {
                Ok(images) => images,
                Err(e) => {
                    warn!(
                        "Related image lookup failed for '{}': {}",
                        prediction.class, e
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(AnalysisResult {
            predictions,
            highest,
            segmented_image_url,
            related_images,
        })
    }
}

/// Normalize probabilities to [0, 1]. A list containing any value above 1.0
/// is read as percent and scaled down as a whole; the backend never mixes
/// scales within one response.
pub fn normalize_probabilities(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
    if predictions.iter().any(|p| p.probability > 1.0) {
        for p in &mut predictions {
            p.probability /= 100.0;
        }
    }
    predictions
}

/// Single linear scan with a probability-0 sentinel: the first entry reaching
/// the maximum wins, and an empty or all-zero list yields no selection.
pub fn highest_prediction(predictions: &[Prediction]) -> Option<Prediction> {
    let mut best: Option<&Prediction> = None;
    let mut best_probability = 0.0_f64;
    for p in predictions {
        if p.probability > best_probability {
            best_probability = p.probability;
            best = Some(p);
        }
    }
    best.cloned()
}
