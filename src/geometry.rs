//! Box geometry over axis-aligned detections.
//!
//! Everything here is pure: overlap predicates, the one-pass clustering scan
//! and the representative box of a cluster. Coordinates are pixels; results of
//! [`representative`] are whole pixels.

use std::cmp::Ordering;

use crate::detect::Detection;

/// A non-empty group of detections connected through pairwise overlap.
///
/// Members keep the order in which the clustering scan visited them.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    members: Vec<Detection>,
}

impl Cluster {
    /// Open a cluster with its first member.
    pub fn new(first: Detection) -> Self {
        Self {
            members: vec![first],
        }
    }

    /// Build a cluster from existing members. Returns `None` for an empty list.
    pub fn from_members(members: Vec<Detection>) -> Option<Self> {
        if members.is_empty() {
            None
        } else {
            Some(Self { members })
        }
    }

    pub fn push(&mut self, det: Detection) {
        self.members.push(det);
    }

    pub fn members(&self) -> &[Detection] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Closed-interval overlap on both axes. Touching edges overlap.
pub fn overlaps(a: &Detection, b: &Detection) -> bool {
    let horizontal = a.x1 <= b.x2 && a.x2 >= b.x1;
    let vertical = a.y1 <= b.y2 && a.y2 >= b.y1;
    horizontal && vertical
}

/// True when `det` overlaps at least one member of `cluster`.
pub fn overlaps_any(det: &Detection, cluster: &Cluster) -> bool {
    cluster.members.iter().any(|member| overlaps(det, member))
}

/// Group detections with a single ordered scan.
///
/// Detections are stably sorted by `(x1, y1)`. The first one opens a cluster;
/// every following detection joins the most recently opened cluster when it
/// overlaps any of its members and opens a new cluster otherwise. Earlier
/// clusters are never revisited, so this is not a full connected-components
/// grouping: two boxes linked only through an older cluster stay apart.
/// Reliability history is compared against clusters built this way, so the
/// scan must not be replaced by a union-find.
pub fn cluster_overlapping(detections: &[Detection]) -> Vec<Cluster> {
    let mut ordered = detections.to_vec();
    ordered.sort_by(scan_order);

    let mut clusters: Vec<Cluster> = Vec::new();
    for det in ordered {
        match clusters.last_mut() {
            Some(latest) if overlaps_any(&det, latest) => latest.push(det),
            _ => clusters.push(Cluster::new(det)),
        }
    }
    clusters
}

fn scan_order(a: &Detection, b: &Detection) -> Ordering {
    a.x1.total_cmp(&b.x1).then_with(|| a.y1.total_cmp(&b.y1))
}

/// Representative box of a cluster.
///
/// A single member is returned as is. Otherwise the box of maximum member
/// width and height is centered on the area-weighted mean of the member
/// centers (each center rounded half away from zero first), floored to whole
/// pixels and clamped to the members' overall extent. The score is the
/// highest member score.
pub fn representative(cluster: &Cluster) -> Detection {
    if let [single] = cluster.members() {
        return *single;
    }

    let members = cluster.members();
    let mut min_x1 = f64::INFINITY;
    let mut min_y1 = f64::INFINITY;
    let mut max_x2 = f64::NEG_INFINITY;
    let mut max_y2 = f64::NEG_INFINITY;
    let mut max_w = f64::NEG_INFINITY;
    let mut max_h = f64::NEG_INFINITY;
    let mut max_score = f32::NEG_INFINITY;

    let mut weight_sum = 0.0f64;
    let mut weighted_x = 0.0f64;
    let mut weighted_y = 0.0f64;
    let mut plain_x = 0.0f64;
    let mut plain_y = 0.0f64;

    for det in members {
        let (x1, y1, x2, y2) = (det.x1 as f64, det.y1 as f64, det.x2 as f64, det.y2 as f64);
        let w = x2 - x1;
        let h = y2 - y1;
        let area = w * h;
        let cx = ((x1 + x2) / 2.0).round();
        let cy = ((y1 + y2) / 2.0).round();

        min_x1 = min_x1.min(x1);
        min_y1 = min_y1.min(y1);
        max_x2 = max_x2.max(x2);
        max_y2 = max_y2.max(y2);
        max_w = max_w.max(w);
        max_h = max_h.max(h);
        max_score = max_score.max(det.score);

        weight_sum += area;
        weighted_x += cx * area;
        weighted_y += cy * area;
        plain_x += cx;
        plain_y += cy;
    }

    // All-degenerate members carry no weight; fall back to the plain mean.
    let (ux, uy) = if weight_sum != 0.0 {
        (weighted_x / weight_sum, weighted_y / weight_sum)
    } else {
        let n = members.len() as f64;
        (plain_x / n, plain_y / n)
    };

    let x1 = min_x1.max((ux - max_w / 2.0).floor());
    let y1 = min_y1.max((uy - max_h / 2.0).floor());
    let x2 = max_x2.min((ux + max_w / 2.0).floor());
    let y2 = max_y2.min((uy + max_h / 2.0).floor());

    Detection::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32, max_score)
}

/// One representative per cluster, in cluster order.
pub fn representatives(clusters: &[Cluster]) -> Vec<Detection> {
    clusters.iter().map(representative).collect()
}
