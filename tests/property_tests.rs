//! Property-based tests for climate-regrid
//!
//! - Test mathematical invariants of rebasing and concatenation
//! - Test staleness monotonicity
//! - Run with ProptestConfig::with_cases(100)

use chrono::NaiveDate;
use climate_regrid::dataset::{Axis, Dataset, MemoryDataset, Variable};
use climate_regrid::ensemble::{month_offset, EnsembleConcatenator, EnsembleMember, EnsembleWindow};
use climate_regrid::staleness::{Decision, StalenessOracle, StalenessRule};
use climate_regrid::Period;
use proptest::prelude::*;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// First-of-month dates between 1950 and 2100
fn arb_month_start() -> impl Strategy<Value = NaiveDate> {
    (1950i32..2100, 1u32..=12).prop_map(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1).unwrap())
}

fn arb_times(max: usize) -> impl Strategy<Value = Vec<SystemTime>> {
    proptest::collection::vec(0u64..1_000_000, 1..max)
        .prop_map(|secs| secs.into_iter().map(|s| UNIX_EPOCH + Duration::from_secs(s)).collect())
}

#[allow(clippy::cast_precision_loss)]
fn member(name: &str, begin: NaiveDate, months: usize) -> EnsembleMember {
    let mut ds = MemoryDataset::new(name);
    ds.push_axis(Axis::new("time", "month", (0..months).map(|i| i as f64).collect()))
        .unwrap();
    ds.push_variable(Variable::new(
        "tas",
        "K",
        vec!["time".into()],
        (0..months).map(|i| i as f64).collect(),
    ))
    .unwrap();
    EnsembleMember {
        name: name.to_string(),
        begin,
        dataset: Box::new(ds),
    }
}

// ============================================================================
// Period tags
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Display and FromStr agree
    #[test]
    fn prop_period_display_parses_back(begin in 1800i32..2200, years in 1u32..200) {
        let period = Period::from_length(begin, years).unwrap();
        let parsed: Period = period.to_string().parse().unwrap();
        prop_assert_eq!(parsed, period);
    }

    /// Diagnostic tags end one year before climatology tags
    #[test]
    fn prop_diagnostic_tag_is_inclusive(begin in 1800i32..2200, years in 1u32..200) {
        let period = Period::from_length(begin, years).unwrap();
        let end = begin + i32::try_from(years).unwrap();
        prop_assert_eq!(period.climatology_tag(), format!("_{begin:04}-{end:04}"));
        prop_assert_eq!(period.diagnostic_tag(), format!("{begin:04}-{:04}", end - 1));
    }
}

// ============================================================================
// Rebasing
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Consecutive months differ by exactly one offset step
    #[test]
    fn prop_month_offset_is_linear(begin in arb_month_start(), epoch in 1900i32..2000) {
        let next = begin.checked_add_months(chrono::Months::new(1)).unwrap();
        prop_assert_eq!(month_offset(next, epoch), month_offset(begin, epoch) + 1);
    }

    /// January of the epoch year is offset zero
    #[test]
    fn prop_epoch_is_origin(epoch in 1900i32..2100) {
        let origin = NaiveDate::from_ymd_opt(epoch, 1, 1).unwrap();
        prop_assert_eq!(month_offset(origin, epoch), 0);
    }

    /// Output length is members * window, regardless of member lengths
    #[test]
    fn prop_concat_length(
        begins in proptest::collection::vec(arb_month_start(), 1..5),
        window in 1usize..24,
        extra in 0usize..12,
    ) {
        let members = begins
            .iter()
            .enumerate()
            .map(|(i, &begin)| member(&format!("m{i}"), begin, window + extra))
            .collect();
        let joined = EnsembleConcatenator::time_series(EnsembleWindow::months(window))
            .concatenate("Ens", members)
            .unwrap();

        let expected = begins.len() * window;
        prop_assert_eq!(joined.axis("time").unwrap().len(), expected);
        prop_assert_eq!(joined.variable("tas").unwrap().data().len(), expected);

        let since = joined.variable("time_since_epoch").unwrap().data();
        for (i, &begin) in begins.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let start = month_offset(begin, 1979) as f64;
            prop_assert_eq!(since[i * window], start);
        }
    }
}

// ============================================================================
// Staleness
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The newest-source rule never skips where the oldest-source rule
    /// recomputes
    #[test]
    fn prop_newest_rule_is_stricter(sources in arb_times(8), sink in 0u64..1_000_000) {
        let sink = Some(UNIX_EPOCH + Duration::from_secs(sink));
        let oldest = StalenessOracle::new(StalenessRule::OldestSource)
            .decide_with_times(&sources, sink, false);
        let newest = StalenessOracle::new(StalenessRule::NewestSource)
            .decide_with_times(&sources, sink, false);
        if oldest.needs_recompute() {
            prop_assert!(newest.needs_recompute());
        }
    }

    /// A sink newer than every source is always skipped
    #[test]
    fn prop_fresh_sink_skips(sources in arb_times(8), rule in prop_oneof![
        Just(StalenessRule::OldestSource),
        Just(StalenessRule::NewestSource),
    ]) {
        let newest = *sources.iter().max().unwrap();
        let sink = Some(newest + Duration::from_secs(1));
        let decision = StalenessOracle::new(rule).decide_with_times(&sources, sink, false);
        prop_assert_eq!(decision, Decision::Skip);
    }

    /// Overwrite always recomputes
    #[test]
    fn prop_overwrite_recomputes(sources in arb_times(8), sink in 0u64..1_000_000) {
        let sink = Some(UNIX_EPOCH + Duration::from_secs(sink));
        let decision = StalenessOracle::default().decide_with_times(&sources, sink, true);
        prop_assert!(decision.needs_recompute());
    }
}
