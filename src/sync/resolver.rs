//! Freshness resolution across replicas

use crate::profile::ProfileRecord;
use crate::store::StoreId;

/// A replica as reported by one store. `None` means the store had no copy
/// (or could not answer).
pub type Candidate = (StoreId, Option<ProfileRecord>);

/// Pick the freshest replica.
///
/// Greatest `updated_at` wins. Equal timestamps are broken by
/// [`StoreId::tie_rank`], so the remote of record wins ties and the result
/// never depends on input order.
pub fn resolve(candidates: &[Candidate]) -> Option<ProfileRecord> {
    winner(candidates).map(|(_, record)| record.clone())
}

/// Like [`resolve`], but also reports which store supplied the winner.
pub fn winner(candidates: &[Candidate]) -> Option<(StoreId, &ProfileRecord)> {
    candidates
        .iter()
        .filter_map(|(id, record)| record.as_ref().map(|r| (*id, r)))
        .max_by_key(|(id, record)| (record.updated_at, id.tie_rank()))
}

/// Stores whose replica is missing or older than `current`.
pub fn stale_stores(candidates: &[Candidate], current: &ProfileRecord) -> Vec<StoreId> {
    candidates
        .iter()
        .filter(|(_, record)| match record {
            Some(r) => current.is_newer_than(r),
            None => true,
        })
        .map(|(id, _)| *id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(updated_at: u64, bio: &str) -> Option<ProfileRecord> {
        let mut r = ProfileRecord::new("u1");
        r.updated_at = updated_at;
        r.bio = bio.into();
        Some(r)
    }

    #[test]
    fn test_newest_wins_regardless_of_order() {
        let forward = vec![(StoreId::Local, at(10, "old")), (StoreId::Primary, at(20, "new"))];
        let backward = vec![(StoreId::Primary, at(20, "new")), (StoreId::Local, at(10, "old"))];

        assert_eq!(resolve(&forward).unwrap().bio, "new");
        assert_eq!(resolve(&backward).unwrap().bio, "new");
    }

    #[test]
    fn test_tie_goes_to_remote_of_record() {
        let candidates = vec![
            (StoreId::Local, at(10, "local")),
            (StoreId::Secondary, at(10, "secondary")),
            (StoreId::Primary, at(10, "primary")),
        ];
        let (id, record) = winner(&candidates).unwrap();
        assert_eq!(id, StoreId::Primary);
        assert_eq!(record.bio, "primary");

        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(resolve(&reversed).unwrap().bio, "primary");
    }

    #[test]
    fn test_missing_entries_are_ignored() {
        let candidates = vec![
            (StoreId::Primary, None),
            (StoreId::Local, at(5, "only")),
            (StoreId::Secondary, None),
        ];
        assert_eq!(resolve(&candidates).unwrap().bio, "only");
    }

    #[test]
    fn test_all_missing_is_not_found() {
        let candidates = vec![(StoreId::Primary, None), (StoreId::Local, None)];
        assert!(resolve(&candidates).is_none());
        assert!(resolve(&[]).is_none());
    }

    #[test]
    fn test_stale_stores() {
        let candidates = vec![
            (StoreId::Primary, at(20, "new")),
            (StoreId::Secondary, at(10, "old")),
            (StoreId::Local, None),
        ];
        let current = resolve(&candidates).unwrap();
        assert_eq!(
            stale_stores(&candidates, &current),
            vec![StoreId::Secondary, StoreId::Local]
        );
    }
}
