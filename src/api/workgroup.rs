//! Work-group sizing.
//!
//! The sizer picks a local work-group shape from the global extents and the
//! device's limits. It is a pure function, so plans can be checked without a
//! device.
//!
//! # Shapes
//!
//! With a target of `T` invocations per group (twice the device's preferred
//! width, 64 on a 32-wide device):
//!
//! - volumetric problems (`z > 1`) get a cube, `[4, 4, 4]`
//! - flat, short problems (`z == 1`, `y < 8`) get a wide strip, `[16, 4, 1]`
//! - other flat problems get a square, `[8, 8, 1]`
//!
//! The shape is then clamped so no axis exceeds the problem or the device.

/// A 3-component extent (x innermost).
pub type UVec3 = [u32; 3];

/// Compute limits of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest local size per axis.
    pub max_workgroup_size: UVec3,
    /// Largest product of the local size.
    pub max_invocations: u32,
    /// Largest number of groups per dispatch axis.
    pub max_workgroups_per_dimension: u32,
    /// Preferred dispatch granularity (warp / wavefront / subgroup width).
    pub preferred_width: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_workgroup_size: [256, 256, 64],
            max_invocations: 256,
            max_workgroups_per_dimension: 65_535,
            preferred_width: 32,
        }
    }
}

#[inline]
pub const fn div_up(n: u32, d: u32) -> u32 {
    n.div_ceil(d)
}

/// Number of groups needed to cover `global` with groups of `local`.
pub fn group_count(global: UVec3, local: UVec3) -> UVec3 {
    [
        div_up(global[0], local[0].max(1)),
        div_up(global[1], local[1].max(1)),
        div_up(global[2], local[2].max(1)),
    ]
}

fn prev_power_of_two(v: u32) -> u32 {
    if v == 0 { 0 } else { 1 << (31 - v.leading_zeros()) }
}

fn base_shape(global: UVec3, invocations: u32) -> UVec3 {
    let bits = invocations.trailing_zeros();
    if global[2] > 1 {
        let z = 1 << (bits / 3);
        let rest = bits - bits / 3;
        let x = 1 << rest.div_ceil(2);
        let y = 1 << (rest / 2);
        [x, y, z]
    } else if global[1] < 8 {
        let y = 4.min(invocations);
        [invocations / y, y, 1]
    } else {
        let x = 1 << bits.div_ceil(2);
        [x, invocations / x, 1]
    }
}

/// Picks a local work-group size for `global` on a device with `limits`.
///
/// Every axis of the result is at least one, at most `max(global, 1)` and at
/// most the device's per-axis limit, and the product never exceeds
/// `max_invocations`.
pub fn adaptive_work_group_size(global: UVec3, limits: &DeviceLimits) -> UVec3 {
    let cap = limits.max_invocations.max(1);
    let target = prev_power_of_two(limits.preferred_width.max(1).saturating_mul(2).min(cap));
    let mut local = base_shape(global, target);

    for axis in 0..3 {
        local[axis] = local[axis]
            .min(global[axis].max(1))
            .min(limits.max_workgroup_size[axis].max(1));
    }

    // very long axes may need wider groups to stay under the group-count limit
    let max_groups = limits.max_workgroups_per_dimension.max(1);
    for axis in 0..3 {
        if div_up(global[axis], local[axis]) > max_groups {
            let others: u32 = (0..3).filter(|&a| a != axis).map(|a| local[a]).product();
            let room = (cap / others.max(1)).max(1);
            let needed = div_up(global[axis], max_groups);
            local[axis] = needed
                .min(room)
                .min(limits.max_workgroup_size[axis].max(1))
                .max(local[axis]);
        }
    }

    while local.iter().product::<u32>() > cap {
        let widest = (0..3).max_by_key(|&a| local[a]).unwrap_or(0);
        local[widest] = (local[widest] / 2).max(1);
    }

    local
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(global: UVec3, limits: &DeviceLimits) -> UVec3 {
        let local = adaptive_work_group_size(global, limits);
        for axis in 0..3 {
            assert!(local[axis] >= 1, "{global:?} -> {local:?}");
            assert!(local[axis] <= global[axis].max(1), "{global:?} -> {local:?}");
            assert!(local[axis] <= limits.max_workgroup_size[axis]);
        }
        assert!(local.iter().product::<u32>() <= limits.max_invocations);
        local
    }

    #[test]
    fn default_shapes() {
        let limits = DeviceLimits::default();
        assert_eq!(check([64, 4, 1], &limits), [16, 4, 1]);
        assert_eq!(check([64, 64, 1], &limits), [8, 8, 1]);
        assert_eq!(check([64, 64, 64], &limits), [4, 4, 4]);
    }

    #[test]
    fn clamps_to_small_problems() {
        let limits = DeviceLimits::default();
        assert_eq!(check([4, 4, 1], &limits), [4, 4, 1]);
        assert_eq!(check([1, 1, 1], &limits), [1, 1, 1]);
        assert_eq!(check([0, 3, 1], &limits), [1, 3, 1]);
    }

    #[test]
    fn follows_preferred_width() {
        let limits = DeviceLimits {
            preferred_width: 64,
            ..DeviceLimits::default()
        };
        assert_eq!(check([512, 512, 1], &limits), [16, 8, 1]);
        let narrow = DeviceLimits {
            preferred_width: 8,
            ..DeviceLimits::default()
        };
        assert_eq!(check([512, 512, 1], &narrow), [4, 4, 1]);
    }

    #[test]
    fn respects_stub_device_limits() {
        let stub = DeviceLimits {
            max_workgroup_size: [8, 2, 1],
            max_invocations: 16,
            max_workgroups_per_dimension: 1 << 20,
            preferred_width: 32,
        };
        for global in [[1000, 1000, 1], [7, 3, 5], [33, 1, 1], [2, 2, 2]] {
            let local = check(global, &stub);
            let groups = group_count(global, local);
            assert!(groups.iter().all(|&g| g <= stub.max_workgroups_per_dimension));
        }
    }

    #[test]
    fn widens_to_fit_group_limit() {
        let limits = DeviceLimits {
            max_workgroups_per_dimension: 100,
            ..DeviceLimits::default()
        };
        let global = [10_000, 1, 1];
        let local = check(global, &limits);
        assert!(group_count(global, local)[0] <= 100);
    }

    #[test]
    fn group_count_rounds_up() {
        assert_eq!(group_count([10, 4, 1], [4, 4, 1]), [3, 1, 1]);
        assert_eq!(group_count([0, 4, 1], [1, 4, 1]), [0, 1, 1]);
    }
}
