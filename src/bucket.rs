use sha1::{Digest, Sha1};

const BUCKET_SCALE_INT: u64 = 0x0FFF_FFFF_FFFF_FFFF;
const BUCKET_SCALE: f32 = BUCKET_SCALE_INT as f32;

/// Number of rollout buckets; a rollout percentage is compared against a bucket in `0..BUCKETS`.
pub const BUCKETS: u64 = 100;

/// RolloutBucketer maps a (flag, identifier) pair onto a stable position in the population.
///
/// The pair is hashed as `"{prefix}:{identifier}"` with SHA-1 and the first 60 bits of the digest
/// (the first 15 hex digits) are used as the hash value. The same pair always lands in the same
/// bucket, on every host and across restarts.
pub struct RolloutBucketer;

impl RolloutBucketer {
    /// Returns the rollout bucket in `[0, 100)` for `identifier` under `flag_name`.
    pub fn bucket(flag_name: &str, identifier: &str) -> u8 {
        (Self::hash(flag_name, identifier) % BUCKETS) as u8
    }

    /// Returns a position in `[0, 1)` for `identifier` under `prefix`.
    pub fn fraction(prefix: &str, identifier: &str) -> f32 {
        Self::hash(prefix, identifier) as f32 / BUCKET_SCALE
    }

    fn hash(prefix: &str, identifier: &str) -> u64 {
        let mut hash = Sha1::new();
        hash.update(prefix.as_bytes());
        hash.update(b":");
        hash.update(identifier.as_bytes());
        let digest = hash.finalize();
        let hexhash = base16ct::lower::encode_string(&digest);

        // 15 hex digits always fit in a u64
        u64::from_str_radix(&hexhash[..15], 16).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spectral::prelude::*;

    const BUCKET_TOLERANCE: f32 = 0.000001;

    #[test]
    fn bucket_by_identifier() {
        assert_that!(RolloutBucketer::bucket("new-checkout", "userKeyA")).is_equal_to(71);
        assert_that!(RolloutBucketer::bucket("new-checkout", "userKeyB")).is_equal_to(35);
        assert_that!(RolloutBucketer::bucket("new-checkout", "userKeyC")).is_equal_to(63);
    }

    #[test]
    fn hash_uses_first_fifteen_hex_digits() {
        // sha1("new-checkout:userKeyA") starts with be909bceea3ba67
        assert_that!(RolloutBucketer::hash("new-checkout", "userKeyA"))
            .is_equal_to(0xbe909bceea3ba67);
    }

    #[test]
    fn fraction_by_identifier() {
        let prefix = "button-color.variant";
        assert_that!(RolloutBucketer::fraction(prefix, "userKeyA"))
            .is_close_to(0.72276786, BUCKET_TOLERANCE);
        assert_that!(RolloutBucketer::fraction(prefix, "userKeyB"))
            .is_close_to(0.4492825, BUCKET_TOLERANCE);
        assert_that!(RolloutBucketer::fraction(prefix, "userKeyC"))
            .is_close_to(0.10064383, BUCKET_TOLERANCE);
    }

    #[test]
    fn flag_name_changes_the_bucket() {
        let a = (0..20).map(|i| RolloutBucketer::bucket("flag-a", &format!("user-{}", i)));
        let b = (0..20).map(|i| RolloutBucketer::bucket("flag-b", &format!("user-{}", i)));
        assert!(a.ne(b));
    }

    #[test]
    fn half_of_a_population_falls_below_fifty() {
        let enabled = (0..100)
            .filter(|i| RolloutBucketer::bucket("fifty-fifty", &format!("user-{}", i)) < 50)
            .count();
        assert_that!(enabled).is_greater_than_or_equal_to(35);
        assert_that!(enabled).is_less_than_or_equal_to(65);
    }

    proptest! {
        #[test]
        fn bucket_is_stable_and_in_range(flag in "[-._a-z0-9]{1,20}", id in ".{0,40}") {
            let bucket = RolloutBucketer::bucket(&flag, &id);
            prop_assert!(u64::from(bucket) < BUCKETS);
            prop_assert_eq!(bucket, RolloutBucketer::bucket(&flag, &id));
        }
    }

    proptest! {
        #[test]
        fn fraction_is_in_unit_interval(prefix in ".{0,20}", id in ".{0,40}") {
            let fraction = RolloutBucketer::fraction(&prefix, &id);
            prop_assert!((0.0..=1.0).contains(&fraction));
        }
    }
}
