use dsp::Station;

/// Frequencies where both WWV and WWVH may be received co-channel. Used
/// to infer a channel's station family and to gate whether station
/// discrimination is even needed (`SHARED` channels need it; dedicated
/// CHU or 20/25 MHz WWV channels don't).
const WWVH_CAPABLE_MHZ: [f64; 4] = [2.5, 5.0, 10.0, 15.0];

/// WWV-only frequencies (no WWVH transmitter on these).
const WWV_ONLY_MHZ: [f64; 2] = [20.0, 25.0];

/// CHU's three frequencies.
const CHU_MHZ: [f64; 3] = [3.330, 7.850, 14.670];

/// The station family a channel's frequency maps to. `Shared` means both
/// WWV and WWVH may be present and discrimination is required each
/// minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationFamily {
    Wwv,
    Wwvh,
    Chu,
    Shared,
}

impl StationFamily {
    pub fn from_frequency_hz(frequency_hz: u64) -> Self {
        let mhz = frequency_hz as f64 / 1_000_000.0;
        if CHU_MHZ.iter().any(|f| (f - mhz).abs() < 0.01) {
            return StationFamily::Chu;
        }
        if WWVH_CAPABLE_MHZ.iter().any(|f| (f - mhz).abs() < 0.01) {
            return StationFamily::Shared;
        }
        if WWV_ONLY_MHZ.iter().any(|f| (f - mhz).abs() < 0.01) {
            return StationFamily::Wwv;
        }
        StationFamily::Wwv
    }

    pub fn candidate_stations(&self) -> &'static [Station] {
        match self {
            StationFamily::Wwv => &[Station::Wwv],
            StationFamily::Wwvh => &[Station::Wwvh],
            StationFamily::Chu => &[Station::Chu],
            StationFamily::Shared => &[Station::Wwv, Station::Wwvh],
        }
    }
}

/// The receiver's position, used by the transmission-time solver's
/// great-circle distance calculation. A Maidenhead grid square is the
/// common case; a precise override is used when one is configured.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverLocation {
    GridSquare(String),
    LatLon { lat_deg: f64, lon_deg: f64 },
}

impl ReceiverLocation {
    /// Decodes a 4 or 6-character Maidenhead locator to its center
    /// lat/lon, or returns the override verbatim.
    pub fn lat_lon(&self) -> (f64, f64) {
        match self {
            ReceiverLocation::LatLon { lat_deg, lon_deg } => (*lat_deg, *lon_deg),
            ReceiverLocation::GridSquare(grid) => decode_grid_square(grid),
        }
    }
}

fn decode_grid_square(grid: &str) -> (f64, f64) {
    let chars: Vec<char> = grid.chars().collect();
    if chars.len() < 4 {
        return (0.0, 0.0);
    }
    let field_lon = (chars[0].to_ascii_uppercase() as i32 - 'A' as i32) as f64 * 20.0 - 180.0;
    let field_lat = (chars[1].to_ascii_uppercase() as i32 - 'A' as i32) as f64 * 10.0 - 90.0;
    let square_lon = chars[2].to_digit(10).unwrap_or(0) as f64 * 2.0;
    let square_lat = chars[3].to_digit(10).unwrap_or(0) as f64 * 1.0;

    let mut lon = field_lon + square_lon + 1.0;
    let mut lat = field_lat + square_lat + 0.5;

    if chars.len() >= 6 {
        let subsq_lon = (chars[4].to_ascii_lowercase() as i32 - 'a' as i32) as f64 * (2.0 / 24.0);
        let subsq_lat = (chars[5].to_ascii_lowercase() as i32 - 'a' as i32) as f64 * (1.0 / 24.0);
        lon = field_lon + square_lon + subsq_lon + 1.0 / 24.0;
        lat = field_lat + square_lat + subsq_lat + 0.5 / 24.0;
    }

    (lat, lon)
}

/// Immutable per-run channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub name: String,
    pub center_frequency_hz: u64,
    pub sample_rate_hz: u32,
    pub description: String,
    pub family: StationFamily,
    pub receiver_location: ReceiverLocation,
}

impl ChannelSpec {
    pub fn new(
        name: impl Into<String>,
        center_frequency_hz: u64,
        sample_rate_hz: u32,
        description: impl Into<String>,
        receiver_location: ReceiverLocation,
    ) -> Self {
        Self {
            name: name.into(),
            center_frequency_hz,
            sample_rate_hz,
            description: description.into(),
            family: StationFamily::from_frequency_hz(center_frequency_hz),
            receiver_location,
        }
    }

    pub fn is_wwvh_capable(&self) -> bool {
        matches!(self.family, StationFamily::Shared | StationFamily::Wwvh)
    }

    pub fn frequency_mhz(&self) -> f64 {
        self.center_frequency_hz as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_shared_frequencies() {
        assert_eq!(StationFamily::from_frequency_hz(10_000_000), StationFamily::Shared);
        assert_eq!(StationFamily::from_frequency_hz(2_500_000), StationFamily::Shared);
    }

    #[test]
    fn classifies_chu_and_wwv_only() {
        assert_eq!(StationFamily::from_frequency_hz(3_330_000), StationFamily::Chu);
        assert_eq!(StationFamily::from_frequency_hz(20_000_000), StationFamily::Wwv);
    }

    #[test]
    fn decodes_grid_square_to_plausible_coordinates() {
        let (lat, lon) = decode_grid_square("EM12");
        assert!((30.0..45.0).contains(&lat), "lat={lat}");
        assert!((-100.0..-80.0).contains(&lon), "lon={lon}");
    }

    #[test]
    fn wwvh_capable_only_on_shared_or_wwvh_channels() {
        let spec = ChannelSpec::new(
            "WWV_10",
            10_000_000,
            20_000,
            "10 MHz shared",
            ReceiverLocation::GridSquare("EM12".to_string()),
        );
        assert!(spec.is_wwvh_capable());

        let spec20 = ChannelSpec::new(
            "WWV_20",
            20_000_000,
            20_000,
            "20 MHz WWV-only",
            ReceiverLocation::GridSquare("EM12".to_string()),
        );
        assert!(!spec20.is_wwvh_capable());
    }
}
