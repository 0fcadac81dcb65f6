use crate::config::ParkingLotConfig;
use crate::types::{Detection, ParkingSpot};

/// Lays the lot out as a row-major grid of unoccupied spots.
pub fn spot_grid(config: &ParkingLotConfig) -> Vec<ParkingSpot> {
    let mut spots = Vec::with_capacity((config.rows * config.columns) as usize);
    for row in 0..config.rows {
        for column in 0..config.columns {
            let x1 = column * config.spot_width;
            let y1 = row * config.spot_height;
            spots.push(ParkingSpot {
                id: format!("{}_{}", row, column),
                bbox: [x1, y1, x1 + config.spot_width, y1 + config.spot_height],
                occupied: false,
            });
        }
    }
    spots
}

/// Axis-aligned intersection with strict inequalities: boxes that only
/// share an edge do not overlap, while any positive-area intersection does.
pub fn overlaps(spot: &ParkingSpot, detection: &Detection) -> bool {
    let [x1, y1, x2, y2] = spot.bbox;
    let [dx1, dy1, dx2, dy2] = detection.bbox;
    (x1 as f32) < dx2 && (x2 as f32) > dx1 && (y1 as f32) < dy2 && (y2 as f32) > dy1
}

pub fn mark_occupancy(spots: &mut [ParkingSpot], detections: &[Detection]) {
    for spot in spots.iter_mut() {
        spot.occupied = detections.iter().any(|d| overlaps(spot, d));
    }
}

pub fn available_count(spots: &[ParkingSpot]) -> u32 {
    spots.iter().filter(|s| !s.occupied).count() as u32
}
