use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use super::engine::Engine;
use super::type_alias::{Cqn, DeviceId};

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);

/// Device limits of a software context.
///
/// Every field has a default, so a partial TOML table is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Maximum number of live queue pairs.
    pub max_qp: u32,

    /// Maximum number of outstanding work requests on one work queue.
    pub max_qp_wr: u32,

    /// Maximum number of entries of one completion queue.
    pub max_cqe: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_qp: 1024,
            max_qp_wr: 16384,
            max_cqe: 65536,
        }
    }
}

struct ContextInner {
    id: DeviceId,
    attr: DeviceConfig,
    engine: Mutex<Engine>,
    next_cqn: AtomicU32,
}

/// Device context.
///
/// The context owns the processing engine shared by every queue pair created
/// on it. Queue pairs can only reach each other (as peers or enable targets)
/// within the same context.
///
/// This type is a simple wrapper of an `Arc` and is guaranteed to have the
/// same memory layout with it.
#[derive(Clone)]
#[repr(transparent)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("attr", &self.inner.attr)
            .finish()
    }
}

impl Context {
    /// Open a software device with the given limits.
    pub fn open(attr: DeviceConfig) -> Self {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "opened device {}: max_qp={}, max_qp_wr={}, max_cqe={}",
            id,
            attr.max_qp,
            attr.max_qp_wr,
            attr.max_cqe
        );
        Context {
            inner: Arc::new(ContextInner {
                id,
                attr,
                engine: Mutex::new(Engine::new()),
                next_cqn: AtomicU32::new(1),
            }),
        }
    }

    /// Get the device limits.
    #[inline]
    pub fn attr(&self) -> &DeviceConfig {
        &self.inner.attr
    }

    /// Get the process-unique identifier of this device context.
    #[inline]
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    /// Whether two handles refer to the same device context.
    #[inline]
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Lock the processing engine.
    #[inline]
    pub(crate) fn engine(&self) -> MutexGuard<'_, Engine> {
        self.inner.engine.lock()
    }

    /// Allocate a fresh CQ number.
    #[inline]
    pub(crate) fn alloc_cqn(&self) -> Cqn {
        self.inner.next_cqn.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::open(DeviceConfig::default())
    }
}
