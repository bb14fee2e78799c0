//! Product kinds, periods and grid targets
//!
//! A derived artifact is identified by *what* was aggregated
//! ([`ProductKind`]), *when* ([`Period`]) and *where* ([`GridTarget`]).
//! All three are matched structurally; nothing here dispatches on string
//! casing or free-form mode flags.

use crate::grid::GridDefinition;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of derived product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Long-term monthly mean over a fixed period
    Climatology,
    /// Monthly values over the full record
    TimeSeries,
    /// Monthly time series at station locations
    StationSeries,
    /// Monthly time series averaged over shapes (basins, provinces)
    ShapeSeries,
    /// Output of the diagnostic package (indices and EOF patterns)
    Diagnostic,
}

/// Whether a product kind takes a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodRule {
    /// A period must be given (or inferred from the catalog)
    Mandatory,
    /// A period must not be given
    Forbidden,
}

/// File-name template family used for a product kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    /// `<prefix><filetype><grid>_clim<period>.nc`
    Climatology,
    /// `<prefix><filetype><grid>_monthly.nc`
    TimeSeries,
    /// `<name>.<filetype>_data.<period>.nc`
    Diagnostic,
}

impl ProductKind {
    /// All product kinds, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Climatology,
        Self::TimeSeries,
        Self::StationSeries,
        Self::ShapeSeries,
        Self::Diagnostic,
    ];

    /// Period requirement of this kind.
    #[must_use]
    pub const fn period_rule(self) -> PeriodRule {
        match self {
            Self::Climatology | Self::Diagnostic => PeriodRule::Mandatory,
            Self::TimeSeries | Self::StationSeries | Self::ShapeSeries => PeriodRule::Forbidden,
        }
    }

    /// Template family used to build file names for this kind.
    #[must_use]
    pub const fn template_family(self) -> TemplateFamily {
        match self {
            Self::Climatology => TemplateFamily::Climatology,
            Self::TimeSeries | Self::StationSeries | Self::ShapeSeries => {
                TemplateFamily::TimeSeries
            }
            Self::Diagnostic => TemplateFamily::Diagnostic,
        }
    }

    /// Whether members of an ensemble can be concatenated for this kind.
    ///
    /// Only kinds with a time axis qualify.
    #[must_use]
    pub const fn supports_ensemble(self) -> bool {
        matches!(self, Self::TimeSeries | Self::Diagnostic)
    }

    /// Whether this kind is tied to point locations instead of a raster.
    #[must_use]
    pub const fn is_point_product(self) -> bool {
        matches!(self, Self::StationSeries | Self::ShapeSeries)
    }

    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Climatology => "climatology",
            Self::TimeSeries => "time_series",
            Self::StationSeries => "station_series",
            Self::ShapeSeries => "shape_series",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Period as an ordered pair of years, `begin < end`.
///
/// The end year is exclusive: `(1979, 1994)` covers fifteen years.
/// Climatology file names print the pair as written, diagnostic file
/// names print the last included year (see [`Period::diagnostic_tag`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    begin: i32,
    end: i32,
}

impl Period {
    /// Create a period.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `begin >= end`.
    pub fn new(begin: i32, end: i32) -> Result<Self> {
        if begin >= end {
            return Err(Error::Config(format!(
                "Illegal period {begin}-{end}: begin year must precede end year"
            )));
        }
        Ok(Self { begin, end })
    }

    /// Create a period of `years` length starting at `begin`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `years` is zero or the end year overflows.
    pub fn from_length(begin: i32, years: u32) -> Result<Self> {
        let end = i32::try_from(years)
            .ok()
            .and_then(|years| begin.checked_add(years))
            .ok_or_else(|| {
                Error::Config(format!("Period of {years} years from {begin} is out of range"))
            })?;
        Self::new(begin, end)
    }

    /// First year.
    #[must_use]
    pub const fn begin(&self) -> i32 {
        self.begin
    }

    /// End year (exclusive).
    #[must_use]
    pub const fn end(&self) -> i32 {
        self.end
    }

    /// Number of years covered.
    #[must_use]
    pub const fn years(&self) -> i32 {
        self.end - self.begin
    }

    /// Climatology tag, e.g. `_1979-1994`.
    #[must_use]
    pub fn climatology_tag(&self) -> String {
        format!("_{:04}-{:04}", self.begin, self.end)
    }

    /// Diagnostic-package tag, e.g. `1979-1993` for `(1979, 1994)`.
    ///
    /// The diagnostic package names files by the last included year.
    #[must_use]
    pub fn diagnostic_tag(&self) -> String {
        format!("{:04}-{:04}", self.begin, self.end - 1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}", self.begin, self.end)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (begin, end) = s
            .split_once('-')
            .ok_or_else(|| Error::Config(format!("Illegal period definition: '{s}'")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<i32>()
                .map_err(|_| Error::Config(format!("Illegal period definition: '{s}'")))
        };
        Self::new(parse(begin)?, parse(end)?)
    }
}

impl TryFrom<String> for Period {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

/// Spatial target of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum GridTarget {
    /// The dataset's own grid (no regridding)
    Native,
    /// A cached grid definition
    Grid(Arc<GridDefinition>),
    /// A named station set
    Stations(String),
    /// A named shape set
    Shapes(String),
}

impl GridTarget {
    /// Human-readable label used in logs and failure reports.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Native => "native".to_string(),
            Self::Grid(grid) => grid.tag_name(),
            Self::Stations(name) | Self::Shapes(name) => name.clone(),
        }
    }
}

impl fmt::Display for GridTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
