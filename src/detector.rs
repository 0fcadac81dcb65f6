use crate::types::Detection;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use log::{debug, info};
use ndarray::{Array4, ArrayView3};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Mutex;

/// COCO class indices kept as vehicles: car, motorcycle, truck.
pub const VEHICLE_CLASSES: [u32; 3] = [2, 3, 7];
/// Detections must score strictly above this to count as a vehicle.
pub const MIN_VEHICLE_CONFIDENCE: f32 = 0.5;

const INPUT_SIZE: u32 = 640;
const CANDIDATE_THRESHOLD: f32 = 0.25;
const IOU_THRESHOLD: f32 = 0.7;
const MAX_DETECTIONS: usize = 300;
const PAD_VALUE: u8 = 114;

/// Object detector over a whole image. Implementations may block.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, failure::Error>;
}

pub fn is_vehicle(detection: &Detection) -> bool {
    detection.confidence > MIN_VEHICLE_CONFIDENCE && VEHICLE_CLASSES.contains(&detection.class_id)
}

pub fn filter_vehicles(detections: Vec<Detection>) -> Vec<Detection> {
    detections.into_iter().filter(is_vehicle).collect()
}

pub fn vehicle_label(class_id: u32) -> Option<&'static str> {
    match class_id {
        2 => Some("car"),
        3 => Some("motorcycle"),
        7 => Some("truck"),
        _ => None,
    }
}

/// YOLOv8 exported to ONNX, run through ONNX Runtime on the CPU.
pub struct YoloDetector {
    // `Session::run` needs `&mut`, so concurrent requests queue here.
    session: Mutex<Session>,
    input_name: String,
}

impl YoloDetector {
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<YoloDetector, failure::Error> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            bail!("Detection model not found: {}", model_path.display());
        }
        info!("Loading detection model from {}", model_path.display());
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());
        debug!("Detection model input: {}", input_name);
        Ok(YoloDetector {
            session: Mutex::new(session),
            input_name,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, failure::Error> {
        let letterbox = Letterbox::fit(image.width(), image.height(), INPUT_SIZE);
        let input = Value::from_array(letterbox.tensor(image))?;
        let predictions = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| format_err!("Detection model lock poisoned"))?;
            let outputs = session.run(ort::inputs![&self.input_name => input])?;
            let output = outputs[0].try_extract_array::<f32>()?;
            output.to_owned()
        };
        let predictions = predictions.into_dimensionality::<ndarray::Ix3>()?;
        let candidates = decode_predictions(predictions.view(), &letterbox)?;
        let detections = non_max_suppression(candidates, IOU_THRESHOLD, MAX_DETECTIONS);
        debug!("Model reported {} objects", detections.len());
        Ok(detections)
    }
}

/// Aspect-preserving resize into a square model input, centred on grey
/// padding.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    source_width: u32,
    source_height: u32,
    size: u32,
    scale: f32,
    scaled_width: u32,
    scaled_height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(source_width: u32, source_height: u32, size: u32) -> Letterbox {
        let scale = (size as f32 / source_width as f32).min(size as f32 / source_height as f32);
        let scaled_width = ((source_width as f32 * scale).round() as u32).clamp(1, size);
        let scaled_height = ((source_height as f32 * scale).round() as u32).clamp(1, size);
        Letterbox {
            source_width,
            source_height,
            size,
            scale,
            scaled_width,
            scaled_height,
            pad_x: (size - scaled_width) / 2,
            pad_y: (size - scaled_height) / 2,
        }
    }

    /// NCHW, RGB, scaled to [0, 1].
    fn tensor(&self, image: &DynamicImage) -> Array4<f32> {
        let resized = imageops::resize(
            &image.to_rgb8(),
            self.scaled_width,
            self.scaled_height,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([PAD_VALUE; 3]));
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);

        let size = self.size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] = pixel[channel] as f32 / 255.0;
            }
        }
        tensor
    }

    /// Maps a model-space point back onto the source image.
    fn restore(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.pad_x as f32) / self.scale;
        let y = (y - self.pad_y as f32) / self.scale;
        (
            x.clamp(0.0, self.source_width as f32),
            y.clamp(0.0, self.source_height as f32),
        )
    }
}

/// Reads a `[1, 4 + classes, anchors]` YOLOv8 head: centre x, centre y,
/// width, height, then one score per class.
fn decode_predictions(
    output: ArrayView3<f32>,
    letterbox: &Letterbox,
) -> Result<Vec<Detection>, failure::Error> {
    let (batch, channels, anchors) = output.dim();
    if batch != 1 || channels <= 4 {
        bail!("Unexpected detection output shape {:?}", output.shape());
    }
    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..channels)
            .map(|c| (c - 4, output[[0, c, anchor]]))
            .fold((0, f32::MIN), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });
        if score < CANDIDATE_THRESHOLD {
            continue;
        }
        let cx = output[[0, 0, anchor]];
        let cy = output[[0, 1, anchor]];
        let half_w = output[[0, 2, anchor]] / 2.0;
        let half_h = output[[0, 3, anchor]] / 2.0;
        let (x1, y1) = letterbox.restore(cx - half_w, cy - half_h);
        let (x2, y2) = letterbox.restore(cx + half_w, cy + half_h);
        detections.push(Detection {
            bbox: [x1, y1, x2, y2],
            confidence: score,
            class_id: class_id as u32,
        });
    }
    Ok(detections)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let width = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let height = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = width * height;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Greedy per-class suppression, highest confidence first.
fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
