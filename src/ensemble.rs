//! Ensemble concatenation with time-axis rebasing
//!
//! Members of an ensemble start at different calendar dates. Before they
//! are joined, each member's time axis is rebased to count months (or
//! years) since a shared epoch, January of [`DEFAULT_EPOCH_YEAR`] unless
//! configured otherwise. Each member then contributes exactly the index
//! window `[0, window)` to the output.
//!
//! ## Output layout
//!
//! ```text
//! member:     0          1          2
//! index:   [0 .. w)   [0 .. w)   [0 .. w)
//! output:  [0 .. w)   [w .. 2w)  [2w .. 3w)
//! ```
//!
//! The concatenated axis counts `0 .. members * w`. The rebased
//! coordinate of every sample is kept in an auxiliary
//! `<axis>_since_epoch` variable, and the member order is recorded in the
//! `ensemble_members` attribute.

use crate::dataset::{Axis, Dataset, MemoryDataset, Variable};
use crate::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use tracing::debug;

/// Default epoch year for rebasing.
pub const DEFAULT_EPOCH_YEAR: i32 = 1979;

/// Relative tolerance when comparing member coordinates.
const COORD_TOLERANCE: f64 = 1e-6;

/// Default ensemble window in years.
pub const DEFAULT_ENSEMBLE_YEARS: u32 = 15;

/// Months between January of `epoch_year` and the month of `begin`.
#[must_use]
pub fn month_offset(begin: NaiveDate, epoch_year: i32) -> i64 {
    i64::from(begin.year() - epoch_year) * 12 + i64::from(begin.month0())
}

/// Years between `epoch_year` and the year of `begin`.
#[must_use]
pub fn year_offset(begin: NaiveDate, epoch_year: i32) -> i64 {
    i64::from(begin.year() - epoch_year)
}

/// Unit of a concatenation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisUnit {
    /// Monthly samples
    Month,
    /// Yearly samples
    Year,
}

/// Axis along which members are joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatAxis {
    name: String,
    unit: AxisUnit,
}

impl ConcatAxis {
    /// Axis with an explicit name and unit.
    pub fn new(name: impl Into<String>, unit: AxisUnit) -> Self {
        Self {
            name: name.into(),
            unit,
        }
    }

    /// Monthly `time` axis.
    #[must_use]
    pub fn time() -> Self {
        Self::new("time", AxisUnit::Month)
    }

    /// Yearly `year` axis.
    #[must_use]
    pub fn year() -> Self {
        Self::new("year", AxisUnit::Year)
    }

    /// Axis name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Axis unit.
    #[must_use]
    pub const fn unit(&self) -> AxisUnit {
        self.unit
    }

    fn offset(&self, begin: NaiveDate, epoch_year: i32) -> i64 {
        match self.unit {
            AxisUnit::Month => month_offset(begin, epoch_year),
            AxisUnit::Year => year_offset(begin, epoch_year),
        }
    }

    fn units(&self) -> &'static str {
        match self.unit {
            AxisUnit::Month => "month",
            AxisUnit::Year => "year",
        }
    }

    fn long_name(&self, epoch_year: i32) -> String {
        match self.unit {
            AxisUnit::Month => format!("Month since {epoch_year:04}-01"),
            AxisUnit::Year => format!("Years since {epoch_year:04}-01"),
        }
    }
}

/// Number of samples each member contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleWindow {
    months: usize,
}

impl EnsembleWindow {
    /// Window of `months` months.
    #[must_use]
    pub const fn months(months: usize) -> Self {
        Self { months }
    }

    /// Window of `years` years.
    #[must_use]
    pub const fn years(years: usize) -> Self {
        Self { months: years * 12 }
    }

    /// Window length in months.
    #[must_use]
    pub const fn len_months(&self) -> usize {
        self.months
    }

    /// Window length on an axis of the given unit.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the window is empty, or not a whole number of
    /// years for a yearly axis.
    pub fn len_for(&self, unit: AxisUnit) -> Result<usize> {
        if self.months == 0 {
            return Err(Error::Config("Ensemble window must not be empty".to_string()));
        }
        match unit {
            AxisUnit::Month => Ok(self.months),
            AxisUnit::Year if self.months % 12 == 0 => Ok(self.months / 12),
            AxisUnit::Year => Err(Error::Config(format!(
                "A window of {} months does not cover whole years",
                self.months
            ))),
        }
    }
}

impl Default for EnsembleWindow {
    fn default() -> Self {
        Self::years(DEFAULT_ENSEMBLE_YEARS as usize)
    }
}

/// One member handed to the concatenator.
pub struct EnsembleMember {
    /// Member name
    pub name: String,
    /// Calendar start (first of a month)
    pub begin: NaiveDate,
    /// Opened member dataset
    pub dataset: Box<dyn Dataset>,
}

impl std::fmt::Debug for EnsembleMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsembleMember")
            .field("name", &self.name)
            .field("begin", &self.begin)
            .field("dataset", &self.dataset.name())
            .finish()
    }
}

/// Replace `axis` of `dataset` by its rebased version.
///
/// The new coordinates run from the member's offset to the epoch for
/// as many samples as the axis has.
///
/// # Errors
///
/// Returns `InconsistentEnsemble` if the axis is missing.
pub fn rebase(
    dataset: &mut dyn Dataset,
    axis: &ConcatAxis,
    begin: NaiveDate,
    epoch_year: i32,
) -> Result<()> {
    let len = dataset
        .axis(axis.name())
        .map(Axis::len)
        .ok_or_else(|| {
            Error::InconsistentEnsemble(format!(
                "Member '{}' has no '{}' axis",
                dataset.name(),
                axis.name()
            ))
        })?;
    let start = axis.offset(begin, epoch_year);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    let coords = (0..len).map(|i| (start + i as i64) as f64).collect();
    let rebased = Axis::new(axis.name(), axis.units(), coords)
        .with_attribute("long_name", axis.long_name(epoch_year));
    dataset.replace_axis(rebased)
}

/// Joins ensemble members along rebased axes.
#[derive(Debug, Clone)]
pub struct EnsembleConcatenator {
    epoch_year: i32,
    axes: Vec<ConcatAxis>,
    window: EnsembleWindow,
}

impl EnsembleConcatenator {
    /// Concatenator for monthly time series.
    #[must_use]
    pub fn time_series(window: EnsembleWindow) -> Self {
        Self::new(vec![ConcatAxis::time()], window)
    }

    /// Concatenator for diagnostic output (`time` and `year` axes).
    #[must_use]
    pub fn diagnostic(window: EnsembleWindow) -> Self {
        Self::new(vec![ConcatAxis::time(), ConcatAxis::year()], window)
    }

    /// Concatenator over arbitrary axes.
    #[must_use]
    pub const fn new(axes: Vec<ConcatAxis>, window: EnsembleWindow) -> Self {
        Self {
            epoch_year: DEFAULT_EPOCH_YEAR,
            axes,
            window,
        }
    }

    /// Set the epoch year.
    #[must_use]
    pub const fn with_epoch_year(mut self, epoch_year: i32) -> Self {
        self.epoch_year = epoch_year;
        self
    }

    /// Epoch year.
    #[must_use]
    pub const fn epoch_year(&self) -> i32 {
        self.epoch_year
    }

    /// Window.
    #[must_use]
    pub const fn window(&self) -> EnsembleWindow {
        self.window
    }

    /// Concatenate `members` in the given order.
    ///
    /// # Errors
    ///
    /// See [`concatenate_checked`](Self::concatenate_checked).
    pub fn concatenate(&self, name: &str, members: Vec<EnsembleMember>) -> Result<MemoryDataset> {
        self.concatenate_checked(name, members, || Ok(()))
    }

    /// Concatenate `members`, calling `check` before each member is
    /// processed (deadline hook).
    ///
    /// Every member dataset is closed, whether or not concatenation
    /// succeeds.
    ///
    /// # Errors
    ///
    /// - `InconsistentEnsemble` if there are no members, a member lacks an
    ///   axis, is shorter than the window, or differs in axes or variables
    /// - `UnsupportedMode` if a variable spans more than one concatenation
    ///   axis
    /// - `Config` if the window does not fit an axis unit
    /// - whatever `check` returns
    pub fn concatenate_checked(
        &self,
        name: &str,
        mut members: Vec<EnsembleMember>,
        mut check: impl FnMut() -> Result<()>,
    ) -> Result<MemoryDataset> {
        let result = self.join(name, &mut members, &mut check);
        let mut close_error = None;
        for member in members {
            if let Err(e) = member.dataset.close() {
                close_error.get_or_insert(e);
            }
        }
        match (result, close_error) {
            (Ok(dataset), None) => Ok(dataset),
            (Err(e), _) | (Ok(_), Some(e)) => Err(e),
        }
    }

    fn join(
        &self,
        name: &str,
        members: &mut [EnsembleMember],
        check: &mut dyn FnMut() -> Result<()>,
    ) -> Result<MemoryDataset> {
        if members.is_empty() {
            return Err(Error::InconsistentEnsemble(format!(
                "Ensemble '{name}' has no members"
            )));
        }
        let windows = self
            .axes
            .iter()
            .map(|axis| self.window.len_for(axis.unit()))
            .collect::<Result<Vec<_>>>()?;

        for member in members.iter_mut() {
            check()?;
            for (axis, &window) in self.axes.iter().zip(&windows) {
                rebase(member.dataset.as_mut(), axis, member.begin, self.epoch_year)?;
                let len = member.dataset.axis(axis.name()).map_or(0, Axis::len);
                if len < window {
                    return Err(Error::InconsistentEnsemble(format!(
                        "Member '{}' has {len} samples on '{}', window needs {window}",
                        member.name,
                        axis.name()
                    )));
                }
            }
            check_shapes(member)?;
            debug!(member = %member.name, begin = %member.begin, "member rebased");
        }

        let reference = members[0].dataset.as_ref();
        for member in &members[1..] {
            self.check_structure(reference, member)?;
        }

        let count = members.len();
        let mut output = MemoryDataset::new(name);
        for (key, value) in reference.attributes() {
            output.attributes_mut().insert(key.clone(), value.clone());
        }
        output.attributes_mut().insert(
            "ensemble_members".to_string(),
            Value::Array(members.iter().map(|m| Value::String(m.name.clone())).collect()),
        );
        output.attributes_mut().insert(
            "epoch".to_string(),
            Value::String(format!("{:04}-01", self.epoch_year)),
        );

        for axis_name in reference.axis_names() {
            let Some(axis) = reference.axis(&axis_name) else { continue };
            match self.concat_index(&axis_name) {
                Some(i) => {
                    let total = count * windows[i];
                    #[allow(clippy::cast_precision_loss)]
                    let coords = (0..total).map(|c| c as f64).collect();
                    let mut joined = Axis::new(axis.name(), axis.units(), coords);
                    if let Some(long_name) = axis.atts().get("long_name") {
                        joined = joined.with_attribute("long_name", long_name.clone());
                    }
                    output.push_axis(joined)?;
                }
                None => output.push_axis(axis.clone())?,
            }
        }

        for (i, axis) in self.axes.iter().enumerate() {
            let window = windows[i];
            let mut since_epoch = Vec::with_capacity(count * window);
            for member in members.iter() {
                let coords = member.dataset.axis(axis.name()).map_or(&[][..], Axis::coords);
                since_epoch.extend_from_slice(&coords[..window]);
            }
            output.push_variable(Variable::new(
                format!("{}_since_epoch", axis.name()),
                axis.units(),
                vec![axis.name().to_string()],
                since_epoch,
            ))?;
        }

        for var_name in reference.variable_names() {
            let Some(template) = reference.variable(&var_name) else { continue };
            let spanned: Vec<usize> = template
                .axes()
                .iter()
                .enumerate()
                .filter(|(_, a)| self.concat_index(a).is_some())
                .map(|(pos, _)| pos)
                .collect();
            let variable = match spanned.as_slice() {
                [] => template.clone(),
                [pos] => self.join_variable(template, *pos, members, &windows)?,
                _ => {
                    return Err(Error::UnsupportedMode(format!(
                        "Variable '{var_name}' spans more than one concatenation axis"
                    )))
                }
            };
            output.push_variable(variable)?;
        }

        debug!(ensemble = name, members = count, "ensemble concatenated");
        Ok(output)
    }

    fn concat_index(&self, axis: &str) -> Option<usize> {
        self.axes.iter().position(|a| a.name() == axis)
    }

    fn check_structure(&self, reference: &dyn Dataset, member: &EnsembleMember) -> Result<()> {
        let other = member.dataset.as_ref();
        let mismatch = |what: String| {
            Error::InconsistentEnsemble(format!(
                "Member '{}' differs from '{}': {what}",
                member.name,
                reference.name()
            ))
        };
        if reference.axis_names() != other.axis_names() {
            return Err(mismatch(format!(
                "axes {:?} vs {:?}",
                other.axis_names(),
                reference.axis_names()
            )));
        }
        for axis_name in reference.axis_names() {
            if self.concat_index(&axis_name).is_some() {
                continue;
            }
            let (Some(a), Some(b)) = (reference.axis(&axis_name), other.axis(&axis_name)) else {
                continue;
            };
            if a.len() != b.len() {
                return Err(mismatch(format!(
                    "axis '{axis_name}' has length {}, expected {}",
                    b.len(),
                    a.len()
                )));
            }
            if a.units() != b.units() {
                return Err(mismatch(format!(
                    "axis '{axis_name}' is in '{}', expected '{}'",
                    b.units(),
                    a.units()
                )));
            }
            if let Some(i) = a
                .coords()
                .iter()
                .zip(b.coords())
                .position(|(x, y)| !same_coord(*x, *y))
            {
                return Err(mismatch(format!(
                    "axis '{axis_name}' has {} at index {i}, expected {}",
                    b.coords()[i],
                    a.coords()[i]
                )));
            }
        }
        if reference.variable_names() != other.variable_names() {
            return Err(mismatch(format!(
                "variables {:?} vs {:?}",
                other.variable_names(),
                reference.variable_names()
            )));
        }
        for var_name in reference.variable_names() {
            let a = reference.variable(&var_name).map(Variable::axes);
            let b = other.variable(&var_name).map(Variable::axes);
            if a != b {
                return Err(mismatch(format!("variable '{var_name}' has different axes")));
            }
        }
        Ok(())
    }

    fn join_variable(
        &self,
        template: &Variable,
        pos: usize,
        members: &[EnsembleMember],
        windows: &[usize],
    ) -> Result<Variable> {
        let axis_name = &template.axes()[pos];
        let window = self
            .concat_index(axis_name)
            .map(|i| windows[i])
            .ok_or_else(|| Error::Other(format!("'{axis_name}' is not a concatenation axis")))?;

        let reference = members[0].dataset.as_ref();
        let lengths = |ds: &dyn Dataset| -> Vec<usize> {
            template
                .axes()
                .iter()
                .map(|a| ds.axis(a).map_or(0, Axis::len))
                .collect()
        };
        let ref_lengths = lengths(reference);
        let outer: usize = ref_lengths[..pos].iter().product();
        let inner: usize = ref_lengths[pos + 1..].iter().product();
        let total = members.len() * window;

        let mut data = vec![f64::NAN; outer * total * inner];
        for (k, member) in members.iter().enumerate() {
            let source = member
                .dataset
                .variable(template.name())
                .ok_or_else(|| {
                    Error::InconsistentEnsemble(format!(
                        "Member '{}' lacks variable '{}'",
                        member.name,
                        template.name()
                    ))
                })?;
            let member_len = lengths(member.dataset.as_ref())[pos];
            for o in 0..outer {
                for i in 0..window {
                    let from = (o * member_len + i) * inner;
                    let to = (o * total + k * window + i) * inner;
                    data[to..to + inner].copy_from_slice(&source.data()[from..from + inner]);
                }
            }
        }

        let mut joined = Variable::new(
            template.name(),
            template.units(),
            template.axes().to_vec(),
            data,
        );
        for (key, value) in template.atts() {
            joined.atts_mut().insert(key.clone(), value.clone());
        }
        Ok(joined)
    }
}

fn same_coord(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (a - b).abs() <= COORD_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

/// Every variable must hold exactly the values its axes imply.
fn check_shapes(member: &EnsembleMember) -> Result<()> {
    let dataset = member.dataset.as_ref();
    for var_name in dataset.variable_names() {
        let Some(variable) = dataset.variable(&var_name) else { continue };
        let mut expected = 1usize;
        for axis in variable.axes() {
            let Some(axis) = dataset.axis(axis) else {
                return Err(Error::InconsistentEnsemble(format!(
                    "Member '{}': variable '{var_name}' refers to missing axis '{axis}'",
                    member.name
                )));
            };
            expected *= axis.len();
        }
        if variable.data().len() != expected {
            return Err(Error::InconsistentEnsemble(format!(
                "Member '{}': variable '{var_name}' holds {} values, axes require {expected}",
                member.name,
                variable.data().len()
            )));
        }
    }
    Ok(())
}
