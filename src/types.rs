use serde::{Deserialize, Serialize};

/// One box reported by the vision model, in source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub confidence: f32,
    /// Index into the 80-class COCO label set.
    pub class_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParkingSpot {
    /// `"{row}_{column}"`
    pub id: String,
    pub bbox: [u32; 4],
    pub occupied: bool,
}

#[derive(Debug, Deserialize)]
pub struct SpotDetectionRequest {
    /// Data URL, e.g. `data:image/jpeg;base64,...`
    pub image: String,
    pub lot_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentRequest {
    /// Minor currency units (cents).
    pub amount: i64,
    pub spot_id: String,
}

#[derive(Debug, Serialize)]
pub struct SpotDetectionResponse {
    pub spots: Vec<ParkingSpot>,
    pub image: Option<String>,
    pub total_spots: u32,
    pub available_spots: u32,
    pub detections: Vec<Detection>,
}
