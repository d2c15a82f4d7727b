//! On-disk flow-direction codes and the D8 neighbour table.
//!
//! The numeric values are a stable wire format: counter-clockwise from
//! east, with 8 = undefined (resolvable flat/sink) and 9 = nodata. Any
//! change here breaks existing flow-direction rasters.

/// A single D8 flow-direction code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    East = 0,
    NorthEast = 1,
    North = 2,
    NorthWest = 3,
    West = 4,
    SouthWest = 5,
    South = 6,
    SouthEast = 7,
    Undefined = 8,
    NoData = 9,
}

impl FlowDirection {
    #[inline]
    pub fn from_code(code: u8) -> Option<Self> {
        use FlowDirection::*;
        Some(match code {
            0 => East,
            1 => NorthEast,
            2 => North,
            3 => NorthWest,
            4 => West,
            5 => SouthWest,
            6 => South,
            7 => SouthEast,
            8 => Undefined,
            9 => NoData,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// True for the eight directions that name an actual neighbour
    /// (excludes Undefined and NoData).
    #[inline]
    pub fn is_valid_direction(self) -> bool {
        (self as u8) <= 7
    }

    /// Row/col offset toward the neighbour this direction points at.
    #[inline]
    pub fn offset(self) -> (isize, isize) {
        D8_OFFSETS[self as usize]
    }
}

pub const FLOW_DIRECTION_NODATA: u8 = FlowDirection::NoData as u8;
pub const FLOW_DIRECTION_UNDEFINED: u8 = FlowDirection::Undefined as u8;

/// (row, col) offsets for codes 0..=7, counter-clockwise from east.
pub const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // East
    (-1, 1),  // NorthEast
    (-1, 0),  // North
    (-1, -1), // NorthWest
    (0, -1),  // West
    (1, -1),  // SouthWest
    (1, 0),   // South
    (1, 1),   // SouthEast
];

/// True where the corresponding `D8_OFFSETS` entry is a diagonal step.
pub const D8_IS_DIAGONAL: [bool; 8] = [false, true, false, true, false, true, false, true];

pub const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// Straight-line distance (in cell widths) of a step in direction `code`.
#[inline]
pub fn step_distance(code: usize) -> f64 {
    if D8_IS_DIAGONAL[code] {
        SQRT_2
    } else {
        1.0
    }
}

/// The code pointing the opposite way from `code` (used to walk upstream
/// from a donor back to the cell it flows into).
#[inline]
pub fn opposite(code: u8) -> Option<u8> {
    if code > 7 {
        return None;
    }
    Some((code as usize + 4).rem_euclid(8) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_all_valid_codes() {
        for c in 0..=9u8 {
            let fd = FlowDirection::from_code(c).unwrap();
            assert_eq!(fd.code(), c);
        }
        assert!(FlowDirection::from_code(10).is_none());
    }

    #[test]
    fn offsets_match_counterclockwise_from_east_ordering() {
        assert_eq!(FlowDirection::East.offset(), (0, 1));
        assert_eq!(FlowDirection::North.offset(), (-1, 0));
        assert_eq!(FlowDirection::West.offset(), (0, -1));
        assert_eq!(FlowDirection::South.offset(), (1, 0));
    }

    #[test]
    fn opposite_is_involution() {
        for c in 0..8u8 {
            let o = opposite(c).unwrap();
            assert_eq!(opposite(o).unwrap(), c);
        }
    }
}
