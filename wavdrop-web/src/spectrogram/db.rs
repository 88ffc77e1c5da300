//! Power to decibel conversion

use ndarray::Array2;

/// Smallest power considered before taking the log
pub const AMIN: f32 = 1e-10;

/// Dynamic range kept below the peak
pub const TOP_DB: f32 = 80.0;

/// Convert a power spectrogram to dB relative to its maximum
///
/// `10 * log10(max(amin, S) / max(amin, max(S)))`, floored at `-top_db`.
/// The loudest cell maps to 0 dB. An all-zero input maps to all zeros.
pub fn power_to_db(power: &Array2<f32>, amin: f32, top_db: f32) -> Array2<f32> {
    let reference = power.iter().copied().fold(0.0f32, f32::max).max(amin);
    let ref_db = 10.0 * reference.log10();

    let db = power.mapv(|p| 10.0 * p.max(amin).log10() - ref_db);
    let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - top_db;
    db.mapv(|v| v.max(floor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_max_maps_to_zero_db() {
        let power = array![[1.0f32, 0.1], [0.01, 4.0]];
        let db = power_to_db(&power, AMIN, TOP_DB);
        assert!((db[[1, 1]]).abs() < 1e-5);
        assert!((db[[0, 0]] - 10.0 * (0.25f32).log10()).abs() < 1e-4);
        assert!(db.iter().all(|&v| v <= 0.0));
    }

    #[test]
    fn test_floor_at_top_db() {
        let power = array![[1.0f32, 1e-12, 0.0]];
        let db = power_to_db(&power, AMIN, TOP_DB);
        assert!((db[[0, 0]]).abs() < 1e-5);
        assert!((db[[0, 1]] + 80.0).abs() < 1e-4);
        assert!((db[[0, 2]] + 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_silence_is_flat_zero() {
        let power = Array2::<f32>::zeros((4, 3));
        let db = power_to_db(&power, AMIN, TOP_DB);
        assert!(db.iter().all(|&v| v == 0.0));
    }
}
