use std::cmp::Ordering;
use std::fmt;
use std::iter::once;
use std::ops::{BitAnd, BitOr, BitXor, Not, Sub};

use itertools::Itertools;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bound {
    value: f64,
    closed: bool,
}

impl Bound {
    const fn closed(value: f64) -> Self {
        Self {
            value,
            closed: true,
        }
    }

    const fn flipped(self) -> Self {
        Self {
            value: self.value,
            closed: !self.closed,
        }
    }
}

/// Location of a boundary on the real line, refined so that boundaries sit between points.
///
/// A boundary at `(v, 0)` lies just before the point `v` and one at `(v, 1)` just after it. A
/// closed lower bound therefore starts at `(v, 0)` and an open one at `(v, 1)`, while a closed
/// upper bound ends at `(v, 1)` and an open one at `(v, 0)`. An interval covers everything
/// between its two boundary positions, and is empty when they coincide or are reversed.
type Position = (f64, u8);

const fn lower_position(bound: Bound) -> Position {
    (bound.value, if bound.closed { 0 } else { 1 })
}

const fn upper_position(bound: Bound) -> Position {
    (bound.value, if bound.closed { 1 } else { 0 })
}

fn compare_positions(a: Position, b: Position) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

/// A connected subset of the real line
///
/// Intervals built from user input are closed. Open ends only arise from complementing a set,
/// and infinite ends are always open.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    lower: Bound,
    upper: Bound,
}

impl Interval {
    /// The closed interval `[lower, upper]`
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] if `lower > upper` or either bound is NaN.
    pub fn closed(lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(Error::InvalidBounds { lower, upper });
        }
        Ok(Self::with_bounds(Bound::closed(lower), Bound::closed(upper)))
    }

    fn with_bounds(mut lower: Bound, mut upper: Bound) -> Self {
        if lower.value.is_infinite() {
            lower.closed = false;
        }
        if upper.value.is_infinite() {
            upper.closed = false;
        }
        Self { lower, upper }
    }

    #[must_use]
    pub const fn lower(&self) -> f64 {
        self.lower.value
    }

    #[must_use]
    pub const fn upper(&self) -> f64 {
        self.upper.value
    }

    #[must_use]
    pub const fn is_lower_closed(&self) -> bool {
        self.lower.closed
    }

    #[must_use]
    pub const fn is_upper_closed(&self) -> bool {
        self.upper.closed
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper.value - self.lower.value
    }

    fn is_empty(&self) -> bool {
        compare_positions(lower_position(self.lower), upper_position(self.upper)).is_ge()
    }

    #[must_use]
    pub fn contains(&self, x: f64) -> bool {
        let above_lower = if self.lower.closed {
            x >= self.lower.value
        } else {
            x > self.lower.value
        };
        let below_upper = if self.upper.closed {
            x <= self.upper.value
        } else {
            x < self.upper.value
        };
        above_lower && below_upper
    }

    /// Whether `other` lies entirely within `self`
    #[must_use]
    pub fn contains_interval(&self, other: &Self) -> bool {
        compare_positions(lower_position(self.lower), lower_position(other.lower)).is_le()
            && compare_positions(upper_position(other.upper), upper_position(self.upper)).is_le()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.lower.closed { '[' } else { '(' };
        let close = if self.upper.closed { ']' } else { ')' };
        write!(f, "{open}{}, {}{close}", self.lower.value, self.upper.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Edge {
    Opening,
    Closing,
}

/// Merge intervals into the minimal sorted list of disjoint, non-touching intervals
///
/// Every interval contributes an opening and a closing edge. Edges are swept in order of
/// position, openings first when positions coincide so touching intervals fuse, while a depth
/// counter tracks how many intervals are currently open. An output interval ends whenever the
/// depth returns to zero.
fn merge(intervals: impl IntoIterator<Item = Interval>) -> Vec<Interval> {
    let edges = intervals
        .into_iter()
        .filter(|interval| !interval.is_empty())
        .flat_map(|interval| {
            [
                (lower_position(interval.lower), Edge::Opening, interval.lower),
                (upper_position(interval.upper), Edge::Closing, interval.upper),
            ]
        })
        .sorted_by(|a, b| compare_positions(a.0, b.0).then(a.1.cmp(&b.1)));

    let mut merged = vec![];
    let mut depth = 0usize;
    let mut start = None;
    for (_, edge, bound) in edges {
        match edge {
            Edge::Opening => {
                if depth == 0 {
                    start = Some(bound);
                }
                depth += 1;
            }
            Edge::Closing => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(lower) = start.take() {
                        merged.push(Interval {
                            lower,
                            upper: bound,
                        });
                    }
                }
            }
        }
    }
    merged
}

/// A union of intervals on the real line
///
/// The stored intervals are always merged, so two sets are equal exactly when they describe the
/// same points. Sets are never modified in place: every operation returns a new set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self { intervals: vec![] }
    }

    /// The whole real line
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            intervals: vec![Interval::with_bounds(
                Bound::closed(f64::NEG_INFINITY),
                Bound::closed(f64::INFINITY),
            )],
        }
    }

    /// The closed interval `[lower, upper]`
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] if `lower > upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        Ok(Self {
            intervals: vec![Interval::closed(lower, upper)?],
        })
    }

    /// The union of the closed intervals described by `pairs`
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] if any pair has `lower > upper`.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let intervals = pairs
            .into_iter()
            .map(|(lower, upper)| Interval::closed(lower, upper))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_intervals(intervals))
    }

    #[must_use]
    pub fn from_intervals(intervals: impl IntoIterator<Item = Interval>) -> Self {
        Self {
            intervals: merge(intervals),
        }
    }

    #[must_use]
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Smallest point bounding the set from below
    #[must_use]
    pub fn lower(&self) -> Option<f64> {
        self.intervals.first().map(Interval::lower)
    }

    /// Largest point bounding the set from above
    #[must_use]
    pub fn upper(&self) -> Option<f64> {
        self.intervals.last().map(Interval::upper)
    }

    #[must_use]
    pub fn contains(&self, x: f64) -> bool {
        self.intervals.iter().any(|interval| interval.contains(x))
    }

    /// Whether every interval of `other` lies within some interval of `self`
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        other.intervals.iter().all(|inner| {
            self.intervals
                .iter()
                .any(|outer| outer.contains_interval(inner))
        })
    }

    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        other.is_superset(self)
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::from_intervals(self.intervals.iter().chain(&other.intervals).copied())
    }

    /// Everything outside the set, with every boundary's closedness flipped
    #[must_use]
    pub fn complement(&self) -> Self {
        let lowers = once(Bound::closed(f64::NEG_INFINITY))
            .chain(self.intervals.iter().map(|interval| interval.upper.flipped()));
        let uppers = self
            .intervals
            .iter()
            .map(|interval| interval.lower.flipped())
            .chain(once(Bound::closed(f64::INFINITY)));

        Self {
            intervals: lowers
                .zip(uppers)
                .map(|(lower, upper)| Interval::with_bounds(lower, upper))
                .filter(|gap| !gap.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        self.complement().union(&other.complement()).complement()
    }

    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.intersection(&other.complement())
    }

    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.difference(other).union(&other.difference(self))
    }
}

impl PartialOrd for IntervalSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.is_subset(other), other.is_subset(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return f.write_str("∅");
        }
        write!(f, "{}", self.intervals.iter().join(" ∪ "))
    }
}

macro_rules! impl_set_operator {
    ($trait:ident, $method:ident, $operation:ident) => {
        impl $trait<&IntervalSet> for &IntervalSet {
            type Output = IntervalSet;
            fn $method(self, rhs: &IntervalSet) -> IntervalSet {
                self.$operation(rhs)
            }
        }

        impl $trait<IntervalSet> for IntervalSet {
            type Output = IntervalSet;
            fn $method(self, rhs: IntervalSet) -> IntervalSet {
                self.$operation(&rhs)
            }
        }
    };
}

impl_set_operator!(BitOr, bitor, union);
impl_set_operator!(BitAnd, bitand, intersection);
impl_set_operator!(Sub, sub, difference);
impl_set_operator!(BitXor, bitxor, symmetric_difference);

impl Not for &IntervalSet {
    type Output = IntervalSet;
    fn not(self) -> IntervalSet {
        self.complement()
    }
}

impl Not for IntervalSet {
    type Output = Self;
    fn not(self) -> Self {
        self.complement()
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::{Interval, IntervalSet};
    use crate::{Error, Result};

    #[test]
    fn touching_intervals_are_merged() -> Result<()> {
        let set = IntervalSet::from_pairs([(0., 1.), (1., 2.), (2., 3.)])?;
        assert_eq!(set, IntervalSet::new(0., 3.)?);
        assert_eq!(set.intervals().len(), 1);
        Ok(())
    }

    #[test]
    fn overlapping_and_nested_intervals_are_merged() -> Result<()> {
        let set = IntervalSet::from_pairs([(5., 6.), (0., 4.), (1., 2.), (3.5, 4.5)])?;
        let expected = IntervalSet::from_pairs([(0., 4.5), (5., 6.)])?;
        assert_eq!(set, expected);
        assert_eq!(set.lower(), Some(0.));
        assert_eq!(set.upper(), Some(6.));
        Ok(())
    }

    #[test]
    fn reversed_bounds_are_rejected() {
        assert!(matches!(
            IntervalSet::new(2., 1.),
            Err(Error::InvalidBounds { .. })
        ));
        assert!(matches!(
            IntervalSet::from_pairs([(0., 1.), (3., f64::NAN)]),
            Err(Error::InvalidBounds { .. })
        ));
    }

    #[test]
    fn membership_includes_bounds() -> Result<()> {
        let set = IntervalSet::from_pairs([(0., 1.), (2., 2.)])?;
        assert!(set.contains(0.));
        assert!(set.contains(1.));
        assert!(set.contains(2.));
        assert!(!set.contains(1.5));
        assert!(!IntervalSet::empty().contains(0.));
        Ok(())
    }

    #[test]
    fn complement_of_unbounded_set_is_empty() {
        assert!(IntervalSet::unbounded().complement().is_empty());
        assert_eq!(IntervalSet::empty().complement(), IntervalSet::unbounded());
        assert!(IntervalSet::unbounded().contains(1e300));
    }

    #[test]
    fn complement_flips_closedness() -> Result<()> {
        let complement = IntervalSet::new(0., 1.)?.complement();
        let intervals = complement.intervals();
        assert_eq!(intervals.len(), 2);
        assert!(!intervals[0].is_upper_closed());
        assert!(!intervals[1].is_lower_closed());
        assert!(!complement.contains(0.));
        assert!(complement.contains(-1e-9));
        Ok(())
    }

    #[test]
    fn single_points_survive_intersection() -> Result<()> {
        let point = IntervalSet::new(1., 1.)?;
        let wide = IntervalSet::new(0., 2.)?;
        assert_eq!(&point & &wide, point);
        assert!((&wide - &point).contains(0.5));
        assert!(!(&wide - &point).contains(1.));
        Ok(())
    }

    #[test]
    fn difference_and_symmetric_difference() -> Result<()> {
        let a = IntervalSet::new(0., 2.)?;
        let b = IntervalSet::new(1., 3.)?;

        let difference = &a - &b;
        assert!(difference.contains(0.5));
        assert!(!difference.contains(1.0));

        let symmetric = &a ^ &b;
        assert!(symmetric.contains(0.5));
        assert!(symmetric.contains(2.5));
        assert!(!symmetric.contains(1.5));
        Ok(())
    }

    #[test]
    fn sets_are_partially_ordered_by_inclusion() -> Result<()> {
        let small = IntervalSet::new(1., 2.)?;
        let large = IntervalSet::from_pairs([(0., 3.), (5., 6.)])?;
        let apart = IntervalSet::new(10., 11.)?;

        assert!(small < large);
        assert!(large > small);
        assert!(small <= small.clone());
        assert!(small.partial_cmp(&apart).is_none());
        assert!(IntervalSet::empty() <= small);
        Ok(())
    }

    #[test]
    fn interval_containment() -> Result<()> {
        let outer = Interval::closed(0., 2.)?;
        let inner = Interval::closed(0.5, 2.)?;
        assert!(outer.contains_interval(&inner));
        assert!(!inner.contains_interval(&outer));
        approx::assert_relative_eq!(inner.width(), 1.5);
        Ok(())
    }

    fn interval_set() -> impl Strategy<Value = IntervalSet> {
        prop::collection::vec((-10i32..10, 0i32..4), 0..5).prop_map(|pairs| {
            IntervalSet::from_pairs(
                pairs
                    .into_iter()
                    .map(|(start, length)| (f64::from(start), f64::from(start + length))),
            )
            .unwrap()
        })
    }

    proptest! {
        #[test]
        fn union_is_commutative(a in interval_set(), b in interval_set()) {
            prop_assert_eq!(&a | &b, &b | &a);
        }

        #[test]
        fn union_is_associative(a in interval_set(), b in interval_set(), c in interval_set()) {
            prop_assert_eq!(&(&a | &b) | &c, &a | &(&b | &c));
        }

        #[test]
        fn a_set_and_its_complement_are_disjoint(a in interval_set()) {
            prop_assert!((&a & &a.complement()).is_empty());
            prop_assert_eq!(a.complement().complement(), a);
        }

        #[test]
        fn a_set_is_within_its_union(a in interval_set(), b in interval_set()) {
            let union = &a | &b;
            prop_assert!(a <= union);
            prop_assert!(b <= union);
            prop_assert!(&a & &b <= a);
        }

        #[test]
        fn membership_follows_set_algebra(
            a in interval_set(),
            b in interval_set(),
            x in (-40i32..40).prop_map(|x| f64::from(x) / 2.)
        ) {
            prop_assert_eq!((&a | &b).contains(x), a.contains(x) || b.contains(x));
            prop_assert_eq!((&a & &b).contains(x), a.contains(x) && b.contains(x));
            prop_assert_eq!((&a - &b).contains(x), a.contains(x) && !b.contains(x));
            prop_assert_eq!((&a ^ &b).contains(x), a.contains(x) != b.contains(x));
        }
    }
}
