//! Centroid extraction: slider interpolation, matrix decoding, touchpad
//! projections and mutual-cap peak search. All math is integer with 8
//! fractional bits; centroids only run after the status machine has
//! confirmed a touch.

use heapless::Vec;

use crate::types::{Position, WidgetPositions, MAX_TOUCHES, MAX_WIDGET_SENSORS};

const FRACTION_BITS: u32 = 8;
const HALF: u64 = 1 << 15;

/// Index of the largest difference count; first wins on ties. `None` when
/// every count is zero.
fn peak_index(diffs: &[u16]) -> Option<usize> {
    let mut best = 0usize;
    let mut best_diff = 0u16;
    for (index, diff) in diffs.iter().enumerate() {
        if *diff > best_diff {
            best = index;
            best_diff = *diff;
        }
    }
    if best_diff == 0 {
        None
    } else {
        Some(best)
    }
}

/// Sub-sensor offset around the peak, in 8.8 signed fixed point.
/// A flat top (zero denominator) centers on the peak sensor.
fn peak_offset_q8(left: u16, peak: u16, right: u16) -> i32 {
    let denominator = 2 * peak as i32 - left as i32 - right as i32;
    if denominator == 0 {
        0
    } else {
        ((right as i32 - left as i32) << FRACTION_BITS) / denominator
    }
}

fn scale_q8(position_q8: i32, multiplier_q8: u32) -> u16 {
    let scaled = (position_q8 as i64 * multiplier_q8 as i64 + HALF as i64) >> (2 * FRACTION_BITS);
    scaled as u16
}

/// Linear slider position in `[0, max_position]`.
pub(crate) fn linear(diffs: &[u16], max_position: u16) -> Option<u16> {
    let count = diffs.len();
    if count < 2 {
        return None;
    }
    let peak = peak_index(diffs)?;
    let left = if peak > 0 { diffs[peak - 1] } else { 0 };
    let right = if peak + 1 < count { diffs[peak + 1] } else { 0 };
    let mut position_q8 = ((peak as i32) << FRACTION_BITS) + peak_offset_q8(left, diffs[peak], right);
    position_q8 = position_q8.clamp(0, ((count - 1) as i32) << FRACTION_BITS);
    let multiplier_q8 = ((max_position as u32) << FRACTION_BITS) / (count as u32 - 1);
    Some(scale_q8(position_q8, multiplier_q8))
}

/// Radial slider position in `[0, max_position]` with wrap-around
/// neighbors, so a touch over the seam interpolates across it.
pub(crate) fn radial(diffs: &[u16], max_position: u16) -> Option<u16> {
    let count = diffs.len();
    if count < 3 {
        return None;
    }
    let peak = peak_index(diffs)?;
    let left = diffs[(peak + count - 1) % count];
    let right = diffs[(peak + 1) % count];
    let span_q8 = (count as i32) << FRACTION_BITS;
    let mut position_q8 = ((peak as i32) << FRACTION_BITS) + peak_offset_q8(left, diffs[peak], right);
    position_q8 = ((position_q8 % span_q8) + span_q8) % span_q8;
    let multiplier_q8 = ((max_position as u32) << FRACTION_BITS) / count as u32;
    Some(scale_q8(position_q8, multiplier_q8).min(max_position))
}

/// Diplexed linear slider: each physical sensor serves two positions. The
/// first half of the virtual space maps identically, the second half maps
/// even physical indices first, then odd ones.
pub(crate) fn diplexed(diffs: &[u16], max_position: u16) -> Option<u16> {
    let count = diffs.len();
    let mut virtual_diffs: Vec<u16, { 2 * MAX_WIDGET_SENSORS }> = Vec::new();
    for diff in diffs {
        let _ = virtual_diffs.push(*diff);
    }
    for physical in (0..count).step_by(2) {
        let _ = virtual_diffs.push(diffs[physical]);
    }
    for physical in (1..count).step_by(2) {
        let _ = virtual_diffs.push(diffs[physical]);
    }
    linear(&virtual_diffs, max_position)
}

/// Matrix decode: exactly one active column and one active row resolve to
/// that crossing; anything more is ambiguous with self-cap sensing.
pub(crate) fn matrix_positions(column_active: &[bool], row_active: &[bool]) -> WidgetPositions {
    let active_columns = column_active.iter().filter(|a| **a).count();
    let active_rows = row_active.iter().filter(|a| **a).count();
    if active_columns == 0 || active_rows == 0 {
        return WidgetPositions::None;
    }
    if active_columns > 1 || active_rows > 1 {
        return WidgetPositions::Multiple;
    }
    let column = column_active.iter().position(|a| *a).unwrap_or(0);
    let row = row_active.iter().position(|a| *a).unwrap_or(0);
    WidgetPositions::single(Position {
        id: (row * column_active.len() + column) as u16,
        x: column as u16,
        y: row as u16,
        z: 0,
    })
}

/// Pluggable touchpad centroid for self-cap row/column projections.
/// Implementations see the per-axis difference profiles and return a
/// position pair, or `None` when the profiles carry no touch.
pub trait TouchpadCentroid {
    fn locate(
        &self,
        columns: &[u16],
        rows: &[u16],
        max_position_x: u16,
        max_position_y: u16,
    ) -> Option<(u16, u16)>;
}

/// Default centroid: independent 3-sensor window per axis.
pub struct ThreeByThreeCentroid;

impl TouchpadCentroid for ThreeByThreeCentroid {
    fn locate(
        &self,
        columns: &[u16],
        rows: &[u16],
        max_position_x: u16,
        max_position_y: u16,
    ) -> Option<(u16, u16)> {
        Some((linear(columns, max_position_x)?, linear(rows, max_position_y)?))
    }
}

/// Wider 5-sensor window with cross-coupling suppression and edge
/// mirroring, for pads whose touch profile spans more than three sensors.
pub struct FiveByFiveCentroid {
    /// Subtracted from every difference before weighting, removing the
    /// shoulder signal that adjacent sensors couple into each other.
    pub cross_coupling_threshold: u16,
    /// Mirror missing taps at the pad edge instead of weighting them zero.
    pub edge_correction: bool,
}

impl FiveByFiveCentroid {
    fn axis(&self, diffs: &[u16], max_position: u16) -> Option<u16> {
        let count = diffs.len();
        if count < 2 {
            return None;
        }
        let mut cleaned: Vec<u16, MAX_WIDGET_SENSORS> = Vec::new();
        for diff in diffs {
            let _ = cleaned.push(diff.saturating_sub(self.cross_coupling_threshold));
        }
        let peak = peak_index(&cleaned)?;
        let mut weighted = 0i64;
        let mut total = 0i64;
        for tap in -2i32..=2 {
            let index = peak as i32 + tap;
            let weight = if index >= 0 && (index as usize) < count {
                cleaned[index as usize] as i64
            } else if self.edge_correction {
                // Reflect the profile about the edge.
                let mirrored = (peak as i32 - tap).clamp(0, count as i32 - 1);
                cleaned[mirrored as usize] as i64
            } else {
                0
            };
            weighted += weight * tap as i64;
            total += weight;
        }
        if total == 0 {
            return None;
        }
        let offset_q8 = ((weighted << FRACTION_BITS) / total) as i32;
        let position_q8 =
            (((peak as i32) << FRACTION_BITS) + offset_q8).clamp(0, ((count - 1) as i32) << FRACTION_BITS);
        let multiplier_q8 = ((max_position as u32) << FRACTION_BITS) / (count as u32 - 1);
        Some(scale_q8(position_q8, multiplier_q8))
    }
}

impl TouchpadCentroid for FiveByFiveCentroid {
    fn locate(
        &self,
        columns: &[u16],
        rows: &[u16],
        max_position_x: u16,
        max_position_y: u16,
    ) -> Option<(u16, u16)> {
        Some((self.axis(columns, max_position_x)?, self.axis(rows, max_position_y)?))
    }
}

/// Strongest local maxima of a mutual-cap node grid, up to [`MAX_TOUCHES`].
/// A node qualifies when its difference exceeds the threshold and no
/// neighbor beats it; ties resolve toward the lower node index.
pub(crate) fn local_maxima(
    diffs: &[u16],
    columns: usize,
    rows: usize,
    threshold: u16,
) -> Vec<(usize, usize), MAX_TOUCHES> {
    let mut peaks: Vec<(usize, usize), MAX_TOUCHES> = Vec::new();
    for row in 0..rows {
        for column in 0..columns {
            let index = row * columns + column;
            let center = diffs[index];
            if center <= threshold {
                continue;
            }
            let mut is_peak = true;
            'neighbors: for dr in -1i32..=1 {
                for dc in -1i32..=1 {
                    if dr == 0 && dc == 0 {
                        continue;
                    }
                    let nr = row as i32 + dr;
                    let nc = column as i32 + dc;
                    if nr < 0 || nc < 0 || nr >= rows as i32 || nc >= columns as i32 {
                        continue;
                    }
                    let neighbor_index = nr as usize * columns + nc as usize;
                    let neighbor = diffs[neighbor_index];
                    if neighbor > center || (neighbor == center && neighbor_index < index) {
                        is_peak = false;
                        break 'neighbors;
                    }
                }
            }
            if !is_peak {
                continue;
            }
            if peaks.is_full() {
                // Keep the strongest three.
                if let Some(weakest) = peaks
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, peak)| diffs[peak.1 * columns + peak.0])
                    .map(|(slot, _)| slot)
                {
                    let (wc, wr) = peaks[weakest];
                    if diffs[wr * columns + wc] < center {
                        peaks[weakest] = (column, row);
                    }
                }
            } else {
                let _ = peaks.push((column, row));
            }
        }
    }
    peaks
}

/// 3x3 weighted centroid around a node peak, scaled to the position space.
pub(crate) fn node_centroid(
    diffs: &[u16],
    columns: usize,
    rows: usize,
    peak: (usize, usize),
    max_position_x: u16,
    max_position_y: u16,
) -> Position {
    let (peak_column, peak_row) = peak;
    let mut total = 0i64;
    let mut weighted_column = 0i64;
    let mut weighted_row = 0i64;
    for dr in -1i32..=1 {
        for dc in -1i32..=1 {
            let nr = peak_row as i32 + dr;
            let nc = peak_column as i32 + dc;
            if nr < 0 || nc < 0 || nr >= rows as i32 || nc >= columns as i32 {
                continue;
            }
            let weight = diffs[nr as usize * columns + nc as usize] as i64;
            total += weight;
            weighted_column += weight * dc as i64;
            weighted_row += weight * dr as i64;
        }
    }
    let (offset_x_q8, offset_y_q8) = if total == 0 {
        (0, 0)
    } else {
        (
            ((weighted_column << FRACTION_BITS) / total) as i32,
            ((weighted_row << FRACTION_BITS) / total) as i32,
        )
    };
    let column_q8 =
        (((peak_column as i32) << FRACTION_BITS) + offset_x_q8).clamp(0, ((columns - 1) as i32) << FRACTION_BITS);
    let row_q8 =
        (((peak_row as i32) << FRACTION_BITS) + offset_y_q8).clamp(0, ((rows - 1) as i32) << FRACTION_BITS);
    let multiplier_x_q8 = ((max_position_x as u32) << FRACTION_BITS) / (columns as u32 - 1).max(1);
    let multiplier_y_q8 = ((max_position_y as u32) << FRACTION_BITS) / (rows as u32 - 1).max(1);
    Position {
        id: 0,
        x: scale_q8(column_q8, multiplier_x_q8),
        y: scale_q8(row_q8, multiplier_y_q8),
        z: diffs[peak_row * columns + peak_column],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_profile_has_no_centroid() {
        assert_eq!(linear(&[0, 0, 0, 0, 0], 100), None);
        assert_eq!(radial(&[0, 0, 0, 0], 100), None);
    }

    #[test]
    fn isolated_peak_lands_on_its_sensor() {
        // Five sensors over [0, 100]: sensor pitch is 25 position units.
        assert_eq!(linear(&[0, 0, 80, 0, 0], 100), Some(50));
        assert_eq!(linear(&[80, 0, 0, 0, 0], 100), Some(0));
        assert_eq!(linear(&[0, 0, 0, 0, 80], 100), Some(100));
    }

    #[test]
    fn symmetric_neighbors_keep_the_peak_centered() {
        assert_eq!(linear(&[0, 40, 90, 40, 0], 100), Some(50));
    }

    #[test]
    fn position_moves_toward_the_heavier_neighbor() {
        let centered = linear(&[0, 0, 90, 0, 0], 100).unwrap();
        let pulled_right = linear(&[0, 0, 90, 60, 0], 100).unwrap();
        let pulled_left = linear(&[0, 60, 90, 0, 0], 100).unwrap();
        assert!(pulled_right > centered);
        assert!(pulled_left < centered);
    }

    #[test]
    fn positions_scale_with_max_position() {
        let small = linear(&[0, 30, 90, 30, 0], 100).unwrap();
        let large = linear(&[0, 30, 90, 30, 0], 1000).unwrap();
        assert!(large >= small * 10 - 5 && large <= small * 10 + 5);
    }

    #[test]
    fn radial_interpolates_across_the_seam() {
        // Peak at sensor 0 pulled toward the last sensor.
        let position = radial(&[90, 20, 0, 0, 0, 60], 600).unwrap();
        assert!(position > 500 || position < 100);
        // Pull is toward the seam, not sensor 1.
        let centered = radial(&[90, 0, 0, 0, 0, 0], 600).unwrap();
        assert_eq!(centered, 0);
    }

    #[test]
    fn diplex_second_half_maps_evens_then_odds() {
        // Physical sensor 2 also serves virtual index 6 (evens 0,2,4 at
        // virtual 5,6,7 for a 5-sensor slider).
        let position_low = diplexed(&[0, 0, 90, 0, 0], 90).unwrap();
        // Virtual space has 10 slots: multiplier 10 per step.
        assert_eq!(position_low, 20);
    }

    #[test]
    fn matrix_single_crossing_resolves() {
        let positions = matrix_positions(&[false, true, false], &[false, true]);
        match positions {
            WidgetPositions::Detected(touches) => {
                assert_eq!(touches.len(), 1);
                assert_eq!(touches[0].x, 1);
                assert_eq!(touches[0].y, 1);
                assert_eq!(touches[0].id, 4);
            }
            other => panic!("expected a single crossing, got {other:?}"),
        }
    }

    #[test]
    fn matrix_ghosting_reports_multiple() {
        assert_eq!(
            matrix_positions(&[true, true, false], &[false, true]),
            WidgetPositions::Multiple
        );
        assert_eq!(
            matrix_positions(&[false, false, false], &[false, true]),
            WidgetPositions::None
        );
    }

    #[test]
    fn five_by_five_subtracts_cross_coupling() {
        let advanced = FiveByFiveCentroid { cross_coupling_threshold: 10, edge_correction: true };
        // A uniform 10-count shoulder must not drag the centroid.
        let clean = advanced.axis(&[0, 0, 90, 0, 0, 0, 0], 600).unwrap();
        let noisy = advanced.axis(&[10, 10, 100, 10, 10, 10, 10], 600).unwrap();
        assert_eq!(clean, noisy);
    }

    #[test]
    fn local_maxima_finds_separated_peaks() {
        // 4x3 grid, peaks at (0,0) and (3,2).
        let diffs = [
            90, 10, 0, 0, //
            10, 0, 0, 10, //
            0, 0, 10, 80, //
        ];
        let peaks = local_maxima(&diffs, 4, 3, 20);
        assert_eq!(peaks.len(), 2);
        assert!(peaks.contains(&(0, 0)));
        assert!(peaks.contains(&(3, 2)));
    }

    #[test]
    fn plateau_produces_one_peak() {
        let diffs = [
            0, 0, 0, 0, //
            0, 90, 90, 0, //
            0, 0, 0, 0, //
        ];
        let peaks = local_maxima(&diffs, 4, 3, 20);
        assert_eq!(peaks.len(), 1);
    }

    #[test]
    fn node_centroid_scales_to_position_space() {
        let diffs = [
            0, 0, 0, 0, //
            0, 0, 90, 0, //
            0, 0, 0, 0, //
        ];
        let position = node_centroid(&diffs, 4, 3, (2, 1), 300, 200);
        assert_eq!(position.x, 200);
        assert_eq!(position.y, 100);
        assert_eq!(position.z, 90);
    }
}
