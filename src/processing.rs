//! Processing-unit collaborator interface
//!
//! A processing unit transforms a source dataset into a sink dataset.
//! Resampling mathematics live behind [`ProcessingUnit::regrid`]; the
//! pipeline only decides *whether* to call it.
//!
//! [`PassThroughFactory`] is the reference implementation: it copies the
//! source into the sink and records every requested transform in the
//! sink's `history` attribute.

use crate::dataset::{copy_dataset, Axis, Dataset};
use crate::grid::GridDefinition;
use crate::Result;
use serde_json::Value;

/// Transform driver bound to one source and one sink.
pub trait ProcessingUnit {
    /// Reproject and resample onto `grid`.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn regrid(&mut self, grid: &GridDefinition) -> Result<()>;

    /// Shift longitudes by `degrees`.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn shift_longitude(&mut self, degrees: f64) -> Result<()>;

    /// Write results into the sink; with `flush` also sync the sink.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn sync(&mut self, flush: bool) -> Result<()>;
}

/// Builds processing units.
pub trait ProcessingUnitFactory: Send + Sync {
    /// Bind a processing unit to `source` and `sink`.
    ///
    /// `variables` restricts the variables carried into the sink.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn construct<'a>(
        &self,
        source: &'a dyn Dataset,
        sink: &'a mut dyn Dataset,
        variables: Option<&'a [String]>,
    ) -> Result<Box<dyn ProcessingUnit + 'a>>;
}

/// Factory for [`PassThroughUnit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFactory;

impl ProcessingUnitFactory for PassThroughFactory {
    fn construct<'a>(
        &self,
        source: &'a dyn Dataset,
        sink: &'a mut dyn Dataset,
        variables: Option<&'a [String]>,
    ) -> Result<Box<dyn ProcessingUnit + 'a>> {
        Ok(Box::new(PassThroughUnit {
            source,
            sink,
            variables,
            history: Vec::new(),
            longitude_shift: 0.0,
            copied: false,
        }))
    }
}

/// Copies data unchanged and records requested transforms.
pub struct PassThroughUnit<'a> {
    source: &'a dyn Dataset,
    sink: &'a mut dyn Dataset,
    variables: Option<&'a [String]>,
    history: Vec<String>,
    longitude_shift: f64,
    copied: bool,
}

impl ProcessingUnit for PassThroughUnit<'_> {
    fn regrid(&mut self, grid: &GridDefinition) -> Result<()> {
        self.history.push(format!("regrid:{}", grid.tag_name()));
        Ok(())
    }

    fn shift_longitude(&mut self, degrees: f64) -> Result<()> {
        self.history.push(format!("shift_longitude:{degrees}"));
        self.longitude_shift += degrees;
        Ok(())
    }

    fn sync(&mut self, flush: bool) -> Result<()> {
        if !self.copied {
            copy_dataset(self.source, &mut *self.sink, self.variables)?;
            let shift = self.longitude_shift;
            if shift != 0.0 {
                let shifted = self.sink.axis("lon").map(|lon| {
                    let coords = lon.coords().iter().map(|c| c + shift).collect();
                    Axis::new(lon.name(), lon.units(), coords)
                });
                if let Some(shifted) = shifted {
                    self.sink.replace_axis(shifted)?;
                }
            }
            self.copied = true;
        }
        if !self.history.is_empty() {
            let history = self.history.iter().cloned().map(Value::String).collect();
            self.sink
                .attributes_mut()
                .insert("history".to_string(), Value::Array(history));
        }
        if flush {
            self.sink.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{MemoryDataset, Variable};
    use crate::grid::{GridShape, Projection};

    fn source() -> MemoryDataset {
        let mut ds = MemoryDataset::new("src").with_attribute("title", "source");
        ds.push_axis(Axis::new("lon", "deg E", vec![0.0, 1.0])).unwrap();
        ds.push_variable(Variable::new("T2", "K", vec!["lon".into()], vec![280.0, 281.0]))
            .unwrap();
        ds.push_variable(Variable::new("PS", "Pa", vec!["lon".into()], vec![1e5, 1e5]))
            .unwrap();
        ds
    }

    #[test]
    fn test_sync_copies_and_records_history() {
        let src = source();
        let mut sink = MemoryDataset::new("sink");
        let grid = GridDefinition::new(
            "arb2",
            Some("d02".into()),
            Projection::Geographic,
            [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            GridShape { ny: 1, nx: 2 },
        )
        .unwrap();
        {
            let mut unit = PassThroughFactory.construct(&src, &mut sink, None).unwrap();
            unit.regrid(&grid).unwrap();
            unit.shift_longitude(-180.0).unwrap();
            unit.sync(false).unwrap();
        }
        assert!(sink.has_variable("T2"));
        assert_eq!(sink.axis("lon").unwrap().coords(), &[-180.0, -179.0]);
        assert_eq!(
            sink.attributes()["history"],
            serde_json::json!(["regrid:arb2_d02", "shift_longitude:-180"])
        );
        assert_eq!(sink.attributes()["title"], "source");
    }

    #[test]
    fn test_variable_filter() {
        let src = source();
        let mut sink = MemoryDataset::new("sink");
        let keep = vec!["PS".to_string()];
        {
            let mut unit = PassThroughFactory
                .construct(&src, &mut sink, Some(keep.as_slice()))
                .unwrap();
            unit.sync(false).unwrap();
        }
        assert_eq!(sink.variable_names(), vec!["PS"]);
    }
}
