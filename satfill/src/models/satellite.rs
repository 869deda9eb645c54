//! Satellite and product identifiers

use chrono::TimeDelta;
use satfill_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported GOES-R platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SatelliteId {
    /// GOES-16 (GOES-East)
    Goes16,
    /// GOES-18 (GOES-West)
    Goes18,
}

impl SatelliteId {
    pub const ALL: [SatelliteId; 2] = [SatelliteId::Goes16, SatelliteId::Goes18];

    /// Name used in CDN paths, local directories and file names
    pub fn code(&self) -> &'static str {
        match self {
            SatelliteId::Goes16 => "GOES16",
            SatelliteId::Goes18 => "GOES18",
        }
    }

    /// Public archive bucket
    pub fn bucket(&self) -> &'static str {
        match self {
            SatelliteId::Goes16 => "noaa-goes16",
            SatelliteId::Goes18 => "noaa-goes18",
        }
    }

    /// Platform token embedded in archive object names
    pub fn platform(&self) -> &'static str {
        match self {
            SatelliteId::Goes16 => "G16",
            SatelliteId::Goes18 => "G18",
        }
    }
}

impl fmt::Display for SatelliteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SatelliteId {
    type Err = Error;

    /// Accepts `GOES16`, `goes-16`, `16`, `east` and the GOES-18 equivalents
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "GOES16" | "16" | "G16" | "EAST" | "GOESEAST" => Ok(SatelliteId::Goes16),
            "GOES18" | "18" | "G18" | "WEST" | "GOESWEST" => Ok(SatelliteId::Goes18),
            _ => Err(Error::InvalidInput(format!("Unknown satellite: {}", s))),
        }
    }
}

/// ABI scan sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sector {
    FullDisk,
    Conus,
    Meso1,
    Meso2,
}

impl Sector {
    pub const ALL: [Sector; 4] = [Sector::FullDisk, Sector::Conus, Sector::Meso1, Sector::Meso2];

    /// Short code used in slugs and CDN file names
    pub fn code(&self) -> &'static str {
        match self {
            Sector::FullDisk => "FD",
            Sector::Conus => "CONUS",
            Sector::Meso1 => "M1",
            Sector::Meso2 => "M2",
        }
    }

    /// Directory segment under `/{sat}/ABI/` on the CDN
    pub fn cdn_path(&self) -> &'static str {
        match self {
            Sector::FullDisk => "FD",
            Sector::Conus => "CONUS",
            Sector::Meso1 => "MESO/M1",
            Sector::Meso2 => "MESO/M2",
        }
    }

    /// Smallest frame size the CDN publishes for the sector
    pub fn cdn_resolution(&self) -> &'static str {
        match self {
            Sector::FullDisk => "1808x1808",
            Sector::Conus => "1250x750",
            Sector::Meso1 | Sector::Meso2 => "1000x1000",
        }
    }

    /// Top-level product directory in the archive bucket
    pub fn archive_product(&self) -> &'static str {
        match self {
            Sector::FullDisk => "ABI-L2-CMIPF",
            Sector::Conus => "ABI-L2-CMIPC",
            Sector::Meso1 | Sector::Meso2 => "ABI-L2-CMIPM",
        }
    }

    /// Product token inside archive object names
    pub fn archive_token(&self) -> &'static str {
        match self {
            Sector::FullDisk => "CMIPF",
            Sector::Conus => "CMIPC",
            Sector::Meso1 => "CMIPM1",
            Sector::Meso2 => "CMIPM2",
        }
    }

    /// Nominal scan cadence in ABI mode 6
    pub fn nominal_cadence(&self) -> TimeDelta {
        match self {
            Sector::FullDisk => TimeDelta::minutes(10),
            Sector::Conus => TimeDelta::minutes(5),
            Sector::Meso1 | Sector::Meso2 => TimeDelta::minutes(1),
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Sector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FD" | "FULLDISK" | "FULL_DISK" | "F" => Ok(Sector::FullDisk),
            "CONUS" | "C" => Ok(Sector::Conus),
            "M1" | "MESO1" => Ok(Sector::Meso1),
            "M2" | "MESO2" => Ok(Sector::Meso2),
            _ => Err(Error::InvalidInput(format!("Unknown sector: {}", s))),
        }
    }
}

/// What is being fetched: a sector and an ABI band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductSpec {
    sector: Sector,
    band: u8,
}

impl ProductSpec {
    pub const MIN_BAND: u8 = 1;
    pub const MAX_BAND: u8 = 16;

    pub fn new(sector: Sector, band: u8) -> Result<Self> {
        if !(Self::MIN_BAND..=Self::MAX_BAND).contains(&band) {
            return Err(Error::InvalidInput(format!(
                "Band {} out of range {}..={}",
                band,
                Self::MIN_BAND,
                Self::MAX_BAND
            )));
        }
        Ok(Self { sector, band })
    }

    pub fn sector(&self) -> Sector {
        self.sector
    }

    pub fn band(&self) -> u8 {
        self.band
    }

    /// Stable textual form, e.g. `FD-C13`
    pub fn slug(&self) -> String {
        format!("{}-C{:02}", self.sector.code(), self.band)
    }

    /// Inverse of [`ProductSpec::slug`]
    pub fn from_slug(slug: &str) -> Result<Self> {
        let (sector, band) = slug
            .rsplit_once("-C")
            .ok_or_else(|| Error::InvalidInput(format!("Malformed product slug: {}", slug)))?;
        let band: u8 = band
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Malformed band in slug: {}", slug)))?;
        Self::new(sector.parse()?, band)
    }
}

impl fmt::Display for ProductSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug())
    }
}

impl FromStr for ProductSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_slug(s)
    }
}
