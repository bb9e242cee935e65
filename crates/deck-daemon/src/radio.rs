//! Smart-radio candidate selection.  Pure; the core owns the async parts.

use deck_proto::track::Track;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Entries of the remaining queue tail sharing the seed's genre, excluding
/// the seed itself.  Duplicates (by id) collapse to their first occurrence.
pub fn genre_candidates(tail: &[Track], seed: &Track, batch: usize) -> Vec<Track> {
    let mut seen = HashSet::new();
    tail.iter()
        .filter(|t| t.id != seed.id && t.shares_genre(seed))
        .filter(|t| seen.insert(t.id.clone()))
        .take(batch)
        .cloned()
        .collect()
}

/// Term sent to discovery: the listener's preferred genre when set.
pub fn discovery_term(preferred_genre: Option<&str>, fallback: &str) -> String {
    preferred_genre
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Discovery results not already in `exclude` (queue ∪ history ids) that
/// pass `playable`, shuffled and cut to `batch`.
pub fn pick_discovered<R, F>(
    results: Vec<Track>,
    exclude: &HashSet<String>,
    batch: usize,
    playable: F,
    rng: &mut R,
) -> Vec<Track>
where
    R: Rng + ?Sized,
    F: Fn(&Track) -> bool,
{
    let mut seen = HashSet::new();
    let mut pool: Vec<Track> = results
        .into_iter()
        .filter(|t| !exclude.contains(&t.id) && playable(t))
        .filter(|t| seen.insert(t.id.clone()))
        .collect();
    pool.shuffle(rng);
    pool.truncate(batch);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::track;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_genre_scan_excludes_seed_and_dedupes() {
        let seed = track("seed", Some("Jazz"));
        let tail = vec![
            seed.clone(),
            track("a", Some("jazz ")),
            track("b", Some("Rock")),
            track("a", Some("Jazz")),
            track("c", Some("JAZZ")),
            track("d", None),
        ];
        let picked: Vec<String> = genre_candidates(&tail, &seed, 5)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(picked, vec!["a", "c"]);
    }

    #[test]
    fn test_genre_scan_without_seed_genre_is_empty() {
        let seed = track("seed", None);
        let tail = vec![seed.clone(), track("a", None)];
        assert!(genre_candidates(&tail, &seed, 5).is_empty());
    }

    #[test]
    fn test_genre_scan_respects_batch() {
        let seed = track("seed", Some("Pop"));
        let tail: Vec<Track> = (0..10).map(|i| track(&i.to_string(), Some("Pop"))).collect();
        assert_eq!(genre_candidates(&tail, &seed, 3).len(), 3);
    }

    #[test]
    fn test_discovery_term() {
        assert_eq!(discovery_term(Some(" Soul "), "top hits"), "Soul");
        assert_eq!(discovery_term(Some("  "), "top hits"), "top hits");
        assert_eq!(discovery_term(None, "top hits"), "top hits");
    }

    #[test]
    fn test_pick_discovered_excludes_known_ids() {
        let results: Vec<Track> = ["q1", "h1", "n1", "n2", "n2", "n3"]
            .iter()
            .map(|id| track(id, None))
            .collect();
        let exclude: HashSet<String> = ["q1", "h1"].iter().map(|s| s.to_string()).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let mut picked: Vec<String> = pick_discovered(results, &exclude, 5, |_| true, &mut rng)
            .into_iter()
            .map(|t| t.id)
            .collect();
        picked.sort();
        assert_eq!(picked, vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn test_pick_discovered_filters_unplayable_and_cuts_batch() {
        let results: Vec<Track> = (0..20).map(|i| track(&format!("t{i}"), None)).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let picked = pick_discovered(
            results,
            &HashSet::new(),
            5,
            |t| t.id != "t3",
            &mut rng,
        );
        assert_eq!(picked.len(), 5);
        assert!(picked.iter().all(|t| t.id != "t3"));
    }
}
