//! Grid definitions and the process-wide grid cache
//!
//! A [`GridDefinition`] is the raster a dataset is resampled onto:
//! projection, affine geotransform and shape. Definitions are immutable
//! once built and are shared as `Arc<GridDefinition>`.

mod cache;

pub use cache::{GridCache, GridKey};

use crate::dataset::Dataset;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Map projection of a grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "definition", rename_all = "snake_case")]
pub enum Projection {
    /// Regular latitude/longitude grid
    Geographic,
    /// Projected grid described by a PROJ.4 string
    Proj4(String),
}

impl Projection {
    /// Parse the projection attribute of a dataset.
    ///
    /// Empty strings and `"geographic"` map to [`Projection::Geographic`].
    #[must_use]
    pub fn from_attribute(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("geographic") {
            Self::Geographic
        } else {
            Self::Proj4(value.to_string())
        }
    }
}

/// Raster shape as `(ny, nx)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    /// Number of rows (south-north)
    pub ny: usize,
    /// Number of columns (west-east)
    pub nx: usize,
}

/// Geospatial raster specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    name: String,
    resolution: Option<String>,
    projection: Projection,
    geotransform: [f64; 6],
    shape: GridShape,
}

impl GridDefinition {
    /// Create a grid definition.
    ///
    /// `geotransform` follows the GDAL convention
    /// `[x0, dx, row_rot, y0, col_rot, dy]`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the name is empty, the shape has a zero
    /// dimension or a pixel size is zero.
    pub fn new(
        name: impl Into<String>,
        resolution: Option<String>,
        projection: Projection,
        geotransform: [f64; 6],
        shape: GridShape,
    ) -> Result<Self> {
        let grid = Self {
            name: name.into(),
            resolution,
            projection,
            geotransform,
            shape,
        };
        grid.validate()?;
        Ok(grid)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Grid definition without a name".to_string()));
        }
        if self.shape.nx == 0 || self.shape.ny == 0 {
            return Err(Error::Config(format!(
                "Grid '{}' has an empty shape ({}x{})",
                self.tag_name(),
                self.shape.ny,
                self.shape.nx
            )));
        }
        #[allow(clippy::float_cmp)]
        if self.geotransform[1] == 0.0 || self.geotransform[5] == 0.0 {
            return Err(Error::Config(format!(
                "Grid '{}' has a zero pixel size",
                self.tag_name()
            )));
        }
        Ok(())
    }

    /// Derive a grid definition from a dataset.
    ///
    /// Reads the `projection` and `geotransform` attributes and takes the
    /// shape from the `y`/`lat` and `x`/`lon` axes. Without a
    /// `geotransform` attribute the transform is inferred from regularly
    /// spaced axis coordinates.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the dataset lacks spatial axes and `Config` if
    /// the attributes are malformed.
    pub fn derive(
        name: impl Into<String>,
        resolution: Option<String>,
        dataset: &dyn Dataset,
    ) -> Result<Self> {
        let name = name.into();
        let y_axis = ["y", "lat"]
            .iter()
            .find_map(|axis| dataset.axis(axis))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Dataset '{}' has no south-north axis to derive grid '{name}' from",
                    dataset.name()
                ))
            })?;
        let x_axis = ["x", "lon"]
            .iter()
            .find_map(|axis| dataset.axis(axis))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Dataset '{}' has no west-east axis to derive grid '{name}' from",
                    dataset.name()
                ))
            })?;

        let projection = dataset
            .attributes()
            .get("projection")
            .and_then(serde_json::Value::as_str)
            .map_or(Projection::Geographic, Projection::from_attribute);

        let geotransform = match dataset.attributes().get("geotransform") {
            Some(value) => serde_json::from_value::<[f64; 6]>(value.clone()).map_err(|e| {
                Error::Config(format!(
                    "Dataset '{}' has a malformed geotransform: {e}",
                    dataset.name()
                ))
            })?,
            None => {
                let (x0, dx) = cell_edges(x_axis.coords()).ok_or_else(|| {
                    Error::Config(format!("Axis '{}' is not regularly spaced", x_axis.name()))
                })?;
                let (y0, dy) = cell_edges(y_axis.coords()).ok_or_else(|| {
                    Error::Config(format!("Axis '{}' is not regularly spaced", y_axis.name()))
                })?;
                [x0, dx, 0.0, y0, 0.0, dy]
            }
        };

        Self::new(
            name,
            resolution,
            projection,
            geotransform,
            GridShape {
                ny: y_axis.len(),
                nx: x_axis.len(),
            },
        )
    }

    /// Grid name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolution tag, if the grid comes in several resolutions.
    #[must_use]
    pub fn resolution(&self) -> Option<&str> {
        self.resolution.as_deref()
    }

    /// Projection.
    #[must_use]
    pub const fn projection(&self) -> &Projection {
        &self.projection
    }

    /// GDAL-style affine transform.
    #[must_use]
    pub const fn geotransform(&self) -> &[f64; 6] {
        &self.geotransform
    }

    /// Raster shape.
    #[must_use]
    pub const fn shape(&self) -> GridShape {
        self.shape
    }

    /// Cache key of this definition.
    #[must_use]
    pub fn key(&self) -> GridKey {
        GridKey::new(&self.name, self.resolution.as_deref())
    }

    /// Name used in file names: `name` or `name_res`.
    #[must_use]
    pub fn tag_name(&self) -> String {
        match &self.resolution {
            Some(res) => format!("{}_{res}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Left cell edge and spacing of a regularly spaced coordinate vector.
fn cell_edges(coords: &[f64]) -> Option<(f64, f64)> {
    if coords.len() < 2 {
        return None;
    }
    let step = coords[1] - coords[0];
    let regular = coords
        .windows(2)
        .all(|pair| ((pair[1] - pair[0]) - step).abs() <= step.abs() * 1e-6);
    if !regular || step == 0.0 {
        return None;
    }
    Some((coords[0] - step / 2.0, step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Axis, MemoryDataset};

    fn shape(ny: usize, nx: usize) -> GridShape {
        GridShape { ny, nx }
    }

    #[test]
    fn test_tag_name_includes_resolution() {
        let grid = GridDefinition::new(
            "arb2",
            Some("d02".to_string()),
            Projection::Geographic,
            [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            shape(10, 20),
        )
        .unwrap();
        assert_eq!(grid.tag_name(), "arb2_d02");
        assert_eq!(grid.key(), GridKey::new("arb2", Some("d02")));
    }

    #[test]
    fn test_rejects_empty_shape() {
        let result = GridDefinition::new(
            "bad",
            None,
            Projection::Geographic,
            [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            shape(0, 20),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_derive_from_axes() {
        let mut dataset = MemoryDataset::new("cesm");
        dataset
            .push_axis(Axis::new("lat", "deg N", vec![-1.0, 0.0, 1.0]))
            .unwrap();
        dataset
            .push_axis(Axis::new("lon", "deg E", vec![0.0, 2.0, 4.0, 6.0]))
            .unwrap();

        let grid = GridDefinition::derive("cesm1x1", None, &dataset).unwrap();
        assert_eq!(grid.shape(), shape(3, 4));
        assert_eq!(grid.projection(), &Projection::Geographic);
        assert!((grid.geotransform()[0] - -1.0).abs() < 1e-12);
        assert!((grid.geotransform()[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_derive_without_spatial_axes_fails() {
        let dataset = MemoryDataset::new("empty");
        let result = GridDefinition::derive("x", None, &dataset);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_projection_from_attribute() {
        assert_eq!(Projection::from_attribute(""), Projection::Geographic);
        assert_eq!(
            Projection::from_attribute("+proj=lcc +lat_1=30"),
            Projection::Proj4("+proj=lcc +lat_1=30".to_string())
        );
    }
}
