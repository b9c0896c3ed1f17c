use candle_core::{DType, Device, D};
use image::RgbImage;
use tracing::{debug, info};

use crate::config::ModelSource;
use crate::error::{InferenceError, Result};
use crate::image_processor::ImageProcessor;
use crate::model::{load_classifier, ClassifierModel, LabelMap, VitClassifier};
use crate::registry::{run_blocking, ModelRegistry};
use crate::sampling::argmax;

/// Outcome of one image classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub class_index: usize,
    /// Softmax probability of `class_index`, in `[0, 1]`.
    pub confidence: f32,
}

/// A resident classifier together with its preprocessor and label table.
pub struct ClassifierHandle {
    model: Box<dyn ClassifierModel>,
    processor: ImageProcessor,
    labels: LabelMap,
    device: Device,
}

impl ClassifierHandle {
    pub fn new(
        model: Box<dyn ClassifierModel>,
        processor: ImageProcessor,
        labels: LabelMap,
        device: Device,
    ) -> Self {
        Self {
            model,
            processor,
            labels,
            device,
        }
    }

    pub fn load(source: &ModelSource, device: &Device) -> Result<Self> {
        let files = load_classifier(source)?;
        let labels = LabelMap::from_config(&std::fs::read_to_string(&files.config)?)?;
        let processor = ImageProcessor::load(&files.preprocessor)?;
        let model = VitClassifier::load(&files, labels.len(), device)?;

        info!(
            "Classifier {} ready with {} labels, input {}x{}",
            source.model_id,
            labels.len(),
            processor.width,
            processor.height
        );
        Ok(Self::new(Box::new(model), processor, labels, device.clone()))
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn classify(&self, image: &RgbImage) -> Result<Classification> {
        let pixels = self.processor.preprocess(image, &self.device)?;
        let logits = self.model.forward(&pixels)?;

        match logits.dims() {
            [1, n] if *n == self.labels.len() => {}
            dims => {
                return Err(InferenceError::Inference(format!(
                    "classifier produced logits of shape {:?}, expected [1, {}]",
                    dims,
                    self.labels.len()
                )))
            }
        }

        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let probs: Vec<f32> = probs.get(0)?.to_dtype(DType::F32)?.to_vec1()?;
        let class_index = argmax(&probs)
            .ok_or_else(|| InferenceError::Inference("classifier produced no scores".into()))?;
        let label = self.labels.get(class_index).ok_or_else(|| {
            InferenceError::Inference(format!("class {} has no label", class_index))
        })?;

        debug!("Class probabilities: {:?}", probs);
        Ok(Classification {
            label: label.to_string(),
            class_index,
            confidence: probs[class_index].clamp(0.0, 1.0),
        })
    }
}

/// Decode `image_bytes`, make sure the classifier is resident, and classify.
pub async fn classify(registry: &ModelRegistry, image_bytes: Vec<u8>) -> Result<Classification> {
    let image = run_blocking(move || ImageProcessor::decode(&image_bytes)).await?;
    let handle = registry.classifier().await?;
    run_blocking(move || handle.classify(&image)).await
}

#[cfg(test)]
pub(crate) mod tests {
    use candle_core::Tensor;

    use super::*;
    use crate::image_processor::tests::png_bytes;

    /// Returns the same logits for every image.
    pub(crate) struct FixedLogits(pub Vec<f32>);

    impl ClassifierModel for FixedLogits {
        fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
            assert_eq!(pixel_values.dims()[..2], [1, 3]);
            Ok(Tensor::from_vec(
                self.0.clone(),
                (1, self.0.len()),
                pixel_values.device(),
            )?)
        }
    }

    pub(crate) fn face_labels() -> LabelMap {
        LabelMap::new(
            ["angry", "disgust", "fear", "happy", "neutral", "sad", "surprise"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap()
    }

    pub(crate) fn tiny_handle(logits: Vec<f32>) -> ClassifierHandle {
        let processor = ImageProcessor {
            height: 4,
            width: 4,
            ..ImageProcessor::default()
        };
        ClassifierHandle::new(
            Box::new(FixedLogits(logits)),
            processor,
            face_labels(),
            Device::Cpu,
        )
    }

    fn sample_image() -> RgbImage {
        ImageProcessor::decode(&png_bytes(9, 7, [200, 180, 150])).unwrap()
    }

    #[test]
    fn picks_the_most_probable_label() {
        let handle = tiny_handle(vec![0.1, -1.0, 0.0, 4.0, 1.0, 0.2, 0.3]);
        let result = handle.classify(&sample_image()).unwrap();

        assert_eq!(result.label, "happy");
        assert_eq!(result.class_index, 3);
        assert!(result.confidence > 0.5 && result.confidence <= 1.0);
        assert_eq!(handle.labels().get(result.class_index), Some("happy"));
    }

    #[test]
    fn uniform_logits_give_uniform_confidence() {
        let handle = tiny_handle(vec![0.0; 7]);
        let result = handle.classify(&sample_image()).unwrap();
        assert_eq!(result.class_index, 0);
        assert!((result.confidence - 1.0 / 7.0).abs() < 1e-5);
    }

    #[test]
    fn label_count_mismatch_is_an_inference_error() {
        let handle = tiny_handle(vec![1.0, 2.0]);
        let err = handle.classify(&sample_image()).unwrap_err();
        assert!(matches!(err, InferenceError::Inference(_)));
    }
}
