//! Numeric debug channels, mirrored out as side effects of each update for
//! blackbox logging and bench regression tests.

/// Four-slot debug groups. Slot meanings are fixed; see the writers in
/// `sensors`, `pid`, `safety` and `engine`.
#[derive(Clone, Default)]
pub struct DebugChannels {
    /// 0: yaw rate out * 10, 1: roll bias (centi-deg), 2: yaw (deg * 10),
    /// 3: direction to home (deg * 10)
    pub heading: [f32; 4],
    /// 0: velocity P, 1: velocity D, 2: velocity to home (cm/s),
    /// 3: target velocity (cm/s)
    pub velocity: [f32; 4],
    /// 0: throttle P, 1: throttle D, 2: current altitude (cm),
    /// 3: target altitude (cm)
    pub throttle_pid: [f32; 4],
    /// 0: velocity to home (cm/s), 1: target velocity (cm/s),
    /// 2: current altitude (cm), 3: target altitude (cm)
    pub tracking: [f32; 4],
    /// 0: pitch bias (centi-deg), 1: phase, 2: failure,
    /// 3: seconds_failing * 100 + seconds_low_sats
    pub rth: [f32; 4],
}
