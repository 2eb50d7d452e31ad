//! Deterministic traffic allocation
//!
//! Users are bucketed by hashing a stable identifier with SHA-256 and
//! taking the low 64 bits of the digest modulo 100. Buckets below the
//! control percentage go to control, everything else to treatment.

use experiment_types::{
    AllocationMethod, DeviceInfo, Experiment, TargetAudience, TrafficSplit, Variant,
};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use tracing::debug;
use uuid::Uuid;

/// Number of allocation buckets
pub const BUCKETS: u64 = 100;

/// Traffic allocator
pub struct TrafficAllocator;

impl TrafficAllocator {
    /// Assign a user to an arm of the experiment
    pub fn assign_variant(experiment: &Experiment, user_id: &str, device_id: &str) -> Variant {
        let variant = Self::assign(&experiment.traffic_split, user_id, device_id);
        debug!(
            "Assigned user {} to {} in experiment {}",
            user_id, variant, experiment.id
        );
        variant
    }

    /// Assign using a bare traffic split
    pub fn assign(split: &TrafficSplit, user_id: &str, device_id: &str) -> Variant {
        let bucket = match split.method {
            AllocationMethod::Random => Self::bucket(&Uuid::new_v4().to_string()),
            AllocationMethod::UserId => Self::bucket(user_id),
            // Geographic splits fall back to the device id until regions
            // carry their own percentages.
            AllocationMethod::DeviceId | AllocationMethod::Geographic => Self::bucket(device_id),
        };

        if (bucket as f64) < split.control_percentage {
            Variant::Control
        } else {
            Variant::Treatment
        }
    }

    /// Bucket in `0..100` for a hash input
    pub fn bucket(input: &str) -> u64 {
        let digest = Sha256::digest(input.as_bytes());
        let mut low = [0u8; 8];
        low.copy_from_slice(&digest[digest.len() - 8..]);
        u64::from_be_bytes(low) % BUCKETS
    }

    /// Whether a device belongs to the experiment's audience
    ///
    /// Empty filters match every device. A device without an OS version
    /// never satisfies a minimum version.
    pub fn is_targeted(audience: &TargetAudience, device: &DeviceInfo) -> bool {
        if !audience.device_models.is_empty()
            && !audience.device_models.iter().any(|m| m == &device.device_model)
        {
            return false;
        }

        if !audience.regions.is_empty() {
            let in_region = device
                .region
                .as_ref()
                .is_some_and(|region| audience.regions.contains(region));
            if !in_region {
                return false;
            }
        }

        match &audience.min_os_version {
            Some(minimum) => {
                !device.os_version.is_empty()
                    && compare_versions(&device.os_version, minimum) != Ordering::Less
            }
            None => true,
        }
    }
}

/// Compare dotted versions numerically, missing components count as 0
fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(left), parse(right));

    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_is_deterministic() {
        let split = TrafficSplit::even();
        let first = TrafficAllocator::assign(&split, "user-42", "device-1");
        for _ in 0..10 {
            assert_eq!(TrafficAllocator::assign(&split, "user-42", "device-9"), first);
        }
    }

    #[test]
    fn test_device_method_ignores_user() {
        let split = TrafficSplit::new(50.0, 50.0, AllocationMethod::DeviceId);
        let a = TrafficAllocator::assign(&split, "user-1", "device-7");
        let b = TrafficAllocator::assign(&split, "user-2", "device-7");
        assert_eq!(a, b);
    }

    #[test]
    fn test_extreme_splits() {
        let all_control = TrafficSplit::new(100.0, 0.0, AllocationMethod::UserId);
        let all_treatment = TrafficSplit::new(0.0, 100.0, AllocationMethod::UserId);
        for i in 0..200 {
            let user = format!("user-{}", i);
            assert_eq!(TrafficAllocator::assign(&all_control, &user, ""), Variant::Control);
            assert_eq!(TrafficAllocator::assign(&all_treatment, &user, ""), Variant::Treatment);
        }
    }

    #[test]
    fn test_bucket_uses_low_digest_bytes() {
        // SHA-256("abc") ends in ...f2 00 15 ad
        let digest = Sha256::digest(b"abc");
        let expected = u64::from_be_bytes(digest[24..32].try_into().unwrap()) % 100;
        assert_eq!(TrafficAllocator::bucket("abc"), expected);
        assert!(TrafficAllocator::bucket("abc") < BUCKETS);
    }

    #[test]
    fn test_empty_audience_matches_everything() {
        let device = DeviceInfo::new("d1");
        assert!(TrafficAllocator::is_targeted(&TargetAudience::everyone(), &device));
    }

    #[test]
    fn test_audience_filters() {
        let audience = TargetAudience {
            device_models: vec!["Pixel 8".to_string()],
            regions: vec!["eu".to_string()],
            min_os_version: Some("14.2".to_string()),
        };

        let matching = DeviceInfo::new("d1")
            .with_model("Pixel 8")
            .with_os_version("14.10")
            .with_region("eu");
        assert!(TrafficAllocator::is_targeted(&audience, &matching));

        let old_os = matching.clone().with_os_version("14.1.9");
        assert!(!TrafficAllocator::is_targeted(&audience, &old_os));

        let wrong_model = matching.clone().with_model("Pixel 6");
        assert!(!TrafficAllocator::is_targeted(&audience, &wrong_model));

        let mut no_region = matching.clone();
        no_region.region = None;
        assert!(!TrafficAllocator::is_targeted(&audience, &no_region));

        let no_os = DeviceInfo::new("d2").with_model("Pixel 8").with_region("eu");
        assert!(!TrafficAllocator::is_targeted(&audience, &no_os));
    }

    #[test]
    fn test_version_comparison() {
        assert_eq!(compare_versions("17.2", "17.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("17.10", "17.9"), Ordering::Greater);
        assert_eq!(compare_versions("9", "10.0"), Ordering::Less);
    }
}
