//! Temporal reliability voting over recent frames.
//!
//! Each frame's raw detections are clustered into a [`Generation`] and kept in
//! a bounded [`History`]. A new detection is trusted once it overlaps clusters
//! in enough past generations; trusted detections are merged into one
//! representative box per cluster before they reach the renderer.

use std::collections::VecDeque;

use crate::detect::Detection;
use crate::geometry::{cluster_overlapping, overlaps_any, representatives, Cluster};

/// Number of past generations kept for voting.
pub const HISTORY_CAPACITY: usize = 5;

/// Highest consistency threshold that can ever be met.
pub const MAX_CONSISTENCY_THRESHOLD: usize = HISTORY_CAPACITY;

/// Clusters computed from one frame's raw detections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Generation {
    clusters: Vec<Cluster>,
}

impl Generation {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    /// Cluster raw detections with the one-pass scan.
    pub fn from_detections(detections: &[Detection]) -> Self {
        Self::new(cluster_overlapping(detections))
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// True when any cluster of this generation overlaps `det`.
    pub fn overlaps(&self, det: &Detection) -> bool {
        self.clusters.iter().any(|cluster| overlaps_any(det, cluster))
    }

    pub fn detection_count(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }
}

/// Sliding window over the most recent generations, oldest first.
///
/// Pushing onto a full window evicts the oldest generation.
#[derive(Clone, Debug, PartialEq)]
pub struct History {
    generations: VecDeque<Generation>,
}

impl History {
    pub fn new() -> Self {
        Self {
            generations: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Seed a history, keeping only the newest [`HISTORY_CAPACITY`] entries.
    pub fn from_generations<I>(generations: I) -> Self
    where
        I: IntoIterator<Item = Generation>,
    {
        let mut history = Self::new();
        for generation in generations {
            history.push(generation);
        }
        history
    }

    /// Append a generation, evicting the oldest one when full.
    pub fn push(&mut self, generation: Generation) {
        while self.generations.len() >= HISTORY_CAPACITY {
            self.generations.pop_front();
        }
        self.generations.push_back(generation);
    }

    /// Number of generations in which some cluster overlaps `det`.
    ///
    /// Each generation counts at most once.
    pub fn support(&self, det: &Detection) -> usize {
        self.generations
            .iter()
            .filter(|generation| generation.overlaps(det))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Generation> + '_ {
        self.generations.iter()
    }

    pub fn len(&self) -> usize {
        self.generations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    pub fn clear(&mut self) {
        self.generations.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

/// Select the reliable detections of one frame and record the frame.
///
/// An empty frame returns nothing and leaves `history` untouched. Otherwise
/// every detection is scored against the history as it was before this frame,
/// the frame's own clustering is appended, and the detections whose support
/// reaches `consistency_threshold` are clustered again and reduced to one
/// representative box per cluster.
pub fn filter_by_history(
    detections: &[Detection],
    history: &mut History,
    consistency_threshold: usize,
) -> Vec<Detection> {
    if detections.is_empty() {
        return Vec::new();
    }

    let reliable: Vec<Detection> = detections
        .iter()
        .filter(|det| history.support(det) >= consistency_threshold)
        .copied()
        .collect();

    history.push(Generation::from_detections(detections));

    if reliable.is_empty() {
        return Vec::new();
    }
    representatives(&cluster_overlapping(&reliable))
}

/// Owns the history of a single stream.
///
/// `filter` takes `&mut self`, so frames of one stream are necessarily fed one
/// at a time and in order.
#[derive(Clone, Debug)]
pub struct ReliabilityFilter {
    history: History,
    consistency_threshold: usize,
}

impl ReliabilityFilter {
    pub fn new(consistency_threshold: usize) -> Self {
        Self::with_history(History::new(), consistency_threshold)
    }

    pub fn with_history(history: History, consistency_threshold: usize) -> Self {
        Self {
            history,
            consistency_threshold,
        }
    }

    /// Reliable representatives for this frame's raw detections.
    pub fn filter(&mut self, detections: &[Detection]) -> Vec<Detection> {
        filter_by_history(detections, &mut self.history, self.consistency_threshold)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn consistency_threshold(&self) -> usize {
        self.consistency_threshold
    }

    /// Forget all past generations, e.g. at a stream boundary.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(raw: [f32; 5]) -> Detection {
        Detection::from_array(raw)
    }

    fn generation(clusters: &[&[[f32; 5]]]) -> Generation {
        Generation::new(
            clusters
                .iter()
                .filter_map(|members| {
                    Cluster::from_members(members.iter().copied().map(det).collect())
                })
                .collect(),
        )
    }

    fn fixture_history() -> History {
        History::from_generations([
            generation(&[
                &[[10.0, 10.0, 20.0, 20.0, 0.2], [5.0, 5.0, 25.0, 25.0, 0.2]],
                &[[100.0, 100.0, 200.0, 200.0, 0.2], [75.0, 75.0, 125.0, 125.0, 0.2]],
            ]),
            generation(&[&[[105.0, 105.0, 205.0, 205.0, 0.2]]]),
            generation(&[&[
                [210.0, 210.0, 220.0, 220.0, 0.2],
                [110.0, 110.0, 210.0, 210.0, 0.2],
                [85.0, 85.0, 125.0, 125.0, 0.2],
            ]]),
            generation(&[&[]]),
            generation(&[&[[10.0, 10.0, 20.0, 20.0, 0.2]]]),
        ])
    }

    #[test]
    fn empty_frame_leaves_history_alone() {
        let mut history = fixture_history();
        let before = history.clone();
        assert!(filter_by_history(&[], &mut history, 0).is_empty());
        assert_eq!(history, before);
    }

    #[test]
    fn box_seen_in_three_generations() {
        let seen = [det([100.0, 105.0, 200.0, 205.0, 0.5])];

        let mut history = fixture_history();
        assert_eq!(history.support(&seen[0]), 3);
        let reliable = filter_by_history(&seen, &mut history, 3);
        assert_eq!(reliable, seen.to_vec());

        let mut history = fixture_history();
        assert!(filter_by_history(&seen, &mut history, 4).is_empty());
    }

    #[test]
    fn box_seen_in_two_generations_misses_threshold_three() {
        let small = [det([10.0, 10.0, 20.0, 20.0, 0.5])];
        let mut history = fixture_history();
        assert_eq!(history.support(&small[0]), 2);
        assert!(filter_by_history(&small, &mut history, 3).is_empty());
    }

    #[test]
    fn zero_threshold_trusts_new_boxes() {
        let unseen = [det([1000.0, 1000.0, 2000.0, 2000.0, 0.5])];

        let mut history = fixture_history();
        assert_eq!(filter_by_history(&unseen, &mut history, 0).len(), 1);

        let mut history = fixture_history();
        assert!(filter_by_history(&unseen, &mut history, 1).is_empty());
    }

    #[test]
    fn frame_is_recorded_even_without_reliable_boxes() {
        let unseen = [det([1000.0, 1000.0, 2000.0, 2000.0, 0.5])];
        let mut history = History::new();
        assert!(filter_by_history(&unseen, &mut history, 1).is_empty());
        assert_eq!(history.len(), 1);
        assert_eq!(history.iter().next().unwrap().detection_count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut filter = ReliabilityFilter::new(2);
        let face = [det([10.0, 10.0, 50.0, 50.0, 0.9])];
        for frame in 0..40 {
            filter.filter(&face);
            assert_eq!(filter.history().len(), (frame + 1).min(HISTORY_CAPACITY));
        }
    }

    #[test]
    fn seeding_keeps_newest_generations() {
        let generations = (0..8).map(|i| {
            let x = i as f32 * 100.0;
            generation(&[&[[x, 0.0, x + 10.0, 10.0, 0.5]]])
        });
        let history = History::from_generations(generations);
        assert_eq!(history.len(), HISTORY_CAPACITY);
        let first = &history.iter().next().unwrap().clusters()[0].members()[0];
        assert_eq!(first.x1, 300.0);
    }

    #[test]
    fn support_counts_each_generation_once() {
        // Two clusters of the same generation overlap the candidate.
        let history = History::from_generations([generation(&[
            &[[0.0, 0.0, 10.0, 10.0, 0.5]],
            &[[20.0, 0.0, 30.0, 10.0, 0.5]],
        ])]);
        assert_eq!(history.support(&det([5.0, 0.0, 25.0, 10.0, 0.5])), 1);
    }

    #[test]
    fn warm_up_latency_matches_threshold() {
        let face = [det([10.0, 10.0, 50.0, 50.0, 0.9])];
        for threshold in 0..=MAX_CONSISTENCY_THRESHOLD {
            let mut filter = ReliabilityFilter::new(threshold);
            let first_reliable = (0..10).find(|_| !filter.filter(&face).is_empty());
            assert_eq!(first_reliable, Some(threshold));
        }
    }

    #[test]
    fn reliable_boxes_are_merged_into_representatives() {
        let frame = [
            det([100.0, 100.0, 200.0, 200.0, 0.5]),
            det([150.0, 150.0, 190.0, 190.0, 0.25]),
            det([500.0, 500.0, 700.0, 700.0, 0.25]),
        ];
        let mut filter = ReliabilityFilter::new(0);
        let reliable = filter.filter(&frame);
        assert_eq!(
            reliable.iter().map(Detection::to_array).collect::<Vec<_>>(),
            vec![[102.0, 102.0, 200.0, 200.0, 0.5], [500.0, 500.0, 700.0, 700.0, 0.25]]
        );
    }

    #[test]
    fn gaps_do_not_consume_history() {
        let face = [det([10.0, 10.0, 50.0, 50.0, 0.9])];
        let mut filter = ReliabilityFilter::new(2);
        assert!(filter.filter(&face).is_empty());
        assert!(filter.filter(&[]).is_empty());
        assert!(filter.filter(&[]).is_empty());
        assert!(filter.filter(&face).is_empty());
        assert_eq!(filter.filter(&face).len(), 1);
        assert_eq!(filter.history().len(), 3);
    }

    #[test]
    fn reset_restarts_warm_up() {
        let face = [det([10.0, 10.0, 50.0, 50.0, 0.9])];
        let mut filter = ReliabilityFilter::new(1);
        filter.filter(&face);
        assert_eq!(filter.filter(&face).len(), 1);
        filter.reset();
        assert!(filter.history().is_empty());
        assert!(filter.filter(&face).is_empty());
    }
}
