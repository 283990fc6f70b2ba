/// [`u32`]: **Queue pair number**, identifies a queue pair on the device.
pub type Qpn = u32;

/// [`u32`]: **Completion queue number**, identifies a completion queue on the device.
pub type Cqn = u32;

/// [`u64`]: **Work request identifier**, designated by the user to identify a work request.
pub type WrId = u64;

/// [`u32`]: **Immediate data**, can be carried in send work requests.
pub type ImmData = u32;

/// [`u32`]: **Enable count**, the `wqe_count` field of an enable work request.
pub type EnableCount = u32;

/// [`u32`]: **Device identifier**, unique to one [`Context`](crate::Context) within the process.
pub type DeviceId = u32;
