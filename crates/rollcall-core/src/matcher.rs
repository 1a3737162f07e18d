//! Nearest-neighbor matching of probe encodings against a snapshot.

use crate::snapshot::Snapshot;
use crate::types::{Encoding, Identity, InvalidInput, MatchResult};

/// Default maximum distance for an accepted match. Lower is stricter.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strategy for comparing a probe encoding against the known identities.
pub trait Matcher: Send + Sync {
    fn compare(
        &self,
        probe: &Encoding,
        snapshot: &Snapshot,
        tolerance: f32,
    ) -> Result<MatchResult, InvalidInput>;
}

/// Linear-scan Euclidean matcher.
///
/// Scans every identity, keeps the minimum distance, and breaks exact ties
/// in favour of the lowest id. Accepts iff `distance <= tolerance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Encoding,
        snapshot: &Snapshot,
        tolerance: f32,
    ) -> Result<MatchResult, InvalidInput> {
        if snapshot.is_empty() {
            return Ok(MatchResult::rejected(f32::INFINITY));
        }
        probe.validate(snapshot.dimension())?;

        let mut best: Option<(&Identity, f32)> = None;
        for identity in snapshot.iter() {
            let distance = probe.euclidean_distance(&identity.reference_encoding);
            let is_better = match best {
                None => true,
                Some((prev, prev_distance)) => {
                    distance < prev_distance || (distance == prev_distance && identity.id < prev.id)
                }
            };
            if is_better {
                best = Some((identity, distance));
            }
        }

        Ok(match best {
            Some((identity, distance)) if distance <= tolerance => {
                MatchResult::accepted(identity.id, distance)
            }
            Some((_, distance)) => MatchResult::rejected(distance),
            None => MatchResult::rejected(f32::INFINITY),
        })
    }
}
