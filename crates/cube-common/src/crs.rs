//! Coordinate Reference System types and utilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GeoError, GeoResult};
use crate::BoundingBox;

/// Well-known CRS codes the catalog and loader understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// NAD83 Geographic
    Epsg4269,
    /// Web Mercator (meters)
    Epsg3857,
    /// WGS84 / UTM, zone 1-60, northern or southern hemisphere
    Utm { zone: u8, north: bool },
    /// GDA94 / Australian Albers
    Epsg3577,
    /// NAD83 / CONUS Albers
    Epsg5070,
    /// NAD83 / Canada Atlas Lambert
    Epsg3978,
}

impl CrsCode {
    /// Build a code from a numeric EPSG identifier.
    pub fn from_epsg(code: u32) -> GeoResult<Self> {
        match code {
            4326 => Ok(CrsCode::Epsg4326),
            4269 => Ok(CrsCode::Epsg4269),
            3857 | 900913 => Ok(CrsCode::Epsg3857),
            3577 => Ok(CrsCode::Epsg3577),
            5070 => Ok(CrsCode::Epsg5070),
            3978 => Ok(CrsCode::Epsg3978),
            32601..=32660 => Ok(CrsCode::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(CrsCode::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ => Err(GeoError::UnsupportedCrs(format!("EPSG:{}", code))),
        }
    }

    /// Numeric EPSG identifier.
    pub fn epsg(&self) -> u32 {
        match self {
            CrsCode::Epsg4326 => 4326,
            CrsCode::Epsg4269 => 4269,
            CrsCode::Epsg3857 => 3857,
            CrsCode::Epsg3577 => 3577,
            CrsCode::Epsg5070 => 5070,
            CrsCode::Epsg3978 => 3978,
            CrsCode::Utm { zone, north: true } => 32600 + *zone as u32,
            CrsCode::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }
}

/// A coordinate reference system resolvable to a projection definition.
///
/// Serialized as its `"EPSG:nnnn"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    pub code: CrsCode,
}

impl Crs {
    pub fn new(code: CrsCode) -> Self {
        Self { code }
    }

    /// WGS84 geographic coordinates.
    pub fn wgs84() -> Self {
        Self::new(CrsCode::Epsg4326)
    }

    /// Build from a numeric EPSG identifier.
    pub fn from_epsg(code: u32) -> GeoResult<Self> {
        CrsCode::from_epsg(code).map(Self::new)
    }

    /// Parse a CRS string.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326"
    /// - "epsg:32655"
    /// - "CRS:84" (equivalent to EPSG:4326 with lon/lat axis order)
    pub fn parse(s: &str) -> GeoResult<Self> {
        let normalized = s.trim().to_uppercase();
        if normalized == "CRS:84" || normalized == "WGS84" {
            return Ok(Self::wgs84());
        }

        let code = normalized
            .strip_prefix("EPSG:")
            .ok_or_else(|| GeoError::InvalidCrs(s.to_string()))?;
        let code: u32 = code
            .parse()
            .map_err(|_| GeoError::InvalidCrs(s.to_string()))?;
        Self::from_epsg(code)
    }

    /// Numeric EPSG identifier.
    pub fn epsg(&self) -> u32 {
        self.code.epsg()
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self.code, CrsCode::Epsg4326 | CrsCode::Epsg4269)
    }

    /// Axis unit name.
    pub fn units(&self) -> &'static str {
        if self.is_geographic() {
            "degrees"
        } else {
            "metre"
        }
    }

    /// Get the valid bounds for this CRS.
    pub fn valid_bounds(&self) -> BoundingBox {
        match self.code {
            CrsCode::Epsg4326 | CrsCode::Epsg4269 => BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            CrsCode::Epsg3857 => {
                // Web Mercator bounds (approx ±85.06° latitude)
                let max_extent = 20037508.342789244;
                BoundingBox::new(-max_extent, -max_extent, max_extent, max_extent)
            }
            CrsCode::Utm { north: true, .. } => {
                BoundingBox::new(166_021.0, 0.0, 833_978.0, 9_329_005.0)
            }
            CrsCode::Utm { north: false, .. } => {
                BoundingBox::new(166_021.0, 1_116_915.0, 833_978.0, 10_000_000.0)
            }
            CrsCode::Epsg3577 => BoundingBox::new(-2_800_000.0, -5_400_000.0, 2_300_000.0, -1_000_000.0),
            CrsCode::Epsg5070 => BoundingBox::new(-2_500_000.0, 200_000.0, 2_500_000.0, 3_200_000.0),
            CrsCode::Epsg3978 => BoundingBox::new(-7_200_000.0, -1_000_000.0, 5_000_000.0, 8_000_000.0),
        }
    }
}

impl FromStr for Crs {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Crs::parse(s)
    }
}

impl TryFrom<String> for Crs {
    type Error = GeoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Crs::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crs() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap().code, CrsCode::Epsg4326);
        assert_eq!(Crs::parse("epsg:3857").unwrap().code, CrsCode::Epsg3857);
        assert_eq!(Crs::parse("CRS:84").unwrap().code, CrsCode::Epsg4326);
        assert!(Crs::parse("EPSG:99999").is_err());
        assert!(Crs::parse("not a crs").is_err());
    }

    #[test]
    fn test_utm_codes() {
        let crs = Crs::parse("EPSG:32655").unwrap();
        assert_eq!(crs.code, CrsCode::Utm { zone: 55, north: true });
        let crs = Crs::parse("EPSG:32755").unwrap();
        assert_eq!(crs.code, CrsCode::Utm { zone: 55, north: false });
        assert_eq!(crs.epsg(), 32755);
        assert_eq!(crs.to_string(), "EPSG:32755");
    }

    #[test]
    fn test_serde_as_string() {
        let crs = Crs::parse("EPSG:3577").unwrap();
        let json = serde_json::to_string(&crs).unwrap();
        assert_eq!(json, "\"EPSG:3577\"");
        let back: Crs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, crs);
    }

    #[test]
    fn test_is_geographic() {
        assert!(Crs::wgs84().is_geographic());
        assert!(!Crs::parse("EPSG:3577").unwrap().is_geographic());
    }
}
