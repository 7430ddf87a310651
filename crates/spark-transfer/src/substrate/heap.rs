use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::trace;

use crate::{
    error::SubstrateError,
    params::SharingParams,
    substrate::{AllocFlags, DomainHint, MemorySubstrate, Region, SubstrateStats},
};

/// `HeapSubstrate` 是基于引用计数堆存储的参考内存基座。
///
/// # 模块角色（Why）
/// - 为不具备真实页表重映射能力的宿主（测试、用户态进程）提供满足隔离不变式的基座；
/// - 复制与重映射均退化为引用共享，首次写入时由 [`Region::with_mut`] 物化私有副本，
///   语义上等价于“写保护 + 缺页复制”。
///
/// # 核心机制（How）
/// - `raw_duplicate` 默认共享源存储（O(1)），`AllocFlags::EAGER_COPY` 时立即物理拷贝；
/// - `raw_virtual_transfer` 仅在目标区域恰好等长时把目标整体改挂到源存储上；
///   部分区域无法以整页粒度替换，直接返回 [`SubstrateError::Rejected`]，由引擎回退到直接拷贝；
/// - `HeapMetrics` 通过原子计数跟踪承诺字节、存活区域与重映射次数，
///   可选的 `max_committed_bytes` 预算让内存不足路径可被确定性地触发。
///
/// # 契约说明（What）
/// - **线程安全**：全部共享状态为原子变量，不同句柄上的并发调用安全；
/// - **承诺口径**：复制按完整长度计入承诺字节，保证此后的写时复制物化不会因预算不足而失败；
/// - **宿主失败**：存储先以 `try_reserve_exact` 预留，超出地址空间或宿主分配器拒绝时返回内存不足，不会 panic；
/// - **位置提示**：堆分配无法控制落点，`DomainHint` 只记录到 trace 事件中。
#[derive(Debug)]
pub struct HeapSubstrate {
    params: SharingParams,
    max_committed_bytes: Option<usize>,
    metrics: HeapMetrics,
}

impl Default for HeapSubstrate {
    fn default() -> Self {
        Self::new(SharingParams::default())
    }
}

impl HeapSubstrate {
    /// 以给定共享参数创建无预算上限的基座。
    pub fn new(params: SharingParams) -> Self {
        Self {
            params,
            max_committed_bytes: None,
            metrics: HeapMetrics::default(),
        }
    }

    /// 设置承诺字节预算；超过预算的分配 / 复制返回内存不足。
    pub fn with_limit(mut self, max_committed_bytes: usize) -> Self {
        self.max_committed_bytes = Some(max_committed_bytes);
        self
    }

    /// 向宿主分配器预留 `size` 字节的存储，失败时返回内存不足而非终止进程。
    ///
    /// 预留先于承诺，宿主拒绝时承诺字节与峰值都不会被推高。
    fn reserve(&self, size: usize) -> Result<Vec<u8>, SubstrateError> {
        let mut storage = Vec::new();
        match storage.try_reserve_exact(size) {
            Ok(()) => Ok(storage),
            Err(err) => {
                self.metrics.failed_allocations.fetch_add(1, Ordering::Relaxed);
                trace!(size, error = %err, "heap substrate could not reserve storage");
                Err(SubstrateError::OutOfMemory {
                    requested: size,
                    available: self.available(),
                })
            }
        }
    }

    /// 预算内剩余字节；未设预算时宿主容量未知，记为 0。
    fn available(&self) -> usize {
        self.max_committed_bytes.map_or(0, |limit| {
            limit.saturating_sub(self.metrics.committed_bytes.load(Ordering::Acquire))
        })
    }

    /// 承诺 `size` 字节；预算不足时记录失败并返回错误。
    fn commit(&self, size: usize) -> Result<(), SubstrateError> {
        let Some(limit) = self.max_committed_bytes else {
            self.metrics.increase_committed(size);
            return Ok(());
        };
        let reserved = self.metrics.committed_bytes.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| {
                current
                    .checked_add(size)
                    .filter(|next| *next <= limit)
            },
        );
        match reserved {
            Ok(previous) => {
                self.metrics.record_peak(previous + size);
                Ok(())
            }
            Err(current) => {
                self.metrics.failed_allocations.fetch_add(1, Ordering::Relaxed);
                Err(SubstrateError::OutOfMemory {
                    requested: size,
                    available: limit.saturating_sub(current),
                })
            }
        }
    }
}

impl MemorySubstrate for HeapSubstrate {
    fn raw_allocate(
        &self,
        hint: DomainHint,
        size: usize,
        _flags: AllocFlags,
    ) -> Result<Region, SubstrateError> {
        let mut storage = self.reserve(size)?;
        self.commit(size)?;
        self.metrics.live_regions.fetch_add(1, Ordering::Relaxed);
        trace!(size, ?hint, "heap substrate allocated region");
        // 堆基座始终返回零页，`ZEROED` 无需额外处理。
        storage.resize(size, 0);
        Ok(Region::from_vec(storage))
    }

    fn raw_duplicate(
        &self,
        source: &Region,
        size: usize,
        flags: AllocFlags,
    ) -> Result<Region, SubstrateError> {
        let region = if flags.contains(AllocFlags::EAGER_COPY) {
            let mut storage = self.reserve(size)?;
            self.commit(size)?;
            storage.extend_from_slice(&source.as_slice()[..size]);
            Region::from_vec(storage)
        } else {
            self.commit(size)?;
            source.share_prefix(size)
        };
        self.metrics.live_regions.fetch_add(1, Ordering::Relaxed);
        Ok(region)
    }

    fn raw_release(&self, region: Region, size: usize) {
        debug_assert_eq!(region.len(), size, "release size must match region length");
        drop(region);
        self.metrics.decrease_committed(size);
        saturating_sub(&self.metrics.live_regions, 1);
    }

    fn raw_virtual_transfer(
        &self,
        source: &Region,
        size: usize,
        destination: &mut Region,
    ) -> Result<(), SubstrateError> {
        if size != destination.len() {
            self.metrics.rejected_remaps.fetch_add(1, Ordering::Relaxed);
            return Err(SubstrateError::rejected(format!(
                "partial remap of {size} bytes into a {}-byte region",
                destination.len()
            )));
        }
        *destination = source.share_prefix(size);
        self.metrics.remaps.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sharing_params(&self) -> SharingParams {
        self.params
    }

    fn statistics(&self) -> SubstrateStats {
        SubstrateStats {
            live_regions: self.metrics.live_regions.load(Ordering::Relaxed),
            committed_bytes: self.metrics.committed_bytes.load(Ordering::Relaxed),
            peak_committed_bytes: self.metrics.peak_committed_bytes.load(Ordering::Relaxed),
            remaps: self.metrics.remaps.load(Ordering::Relaxed),
            rejected_remaps: self.metrics.rejected_remaps.load(Ordering::Relaxed),
            failed_allocations: self.metrics.failed_allocations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct HeapMetrics {
    live_regions: AtomicUsize,
    committed_bytes: AtomicUsize,
    peak_committed_bytes: AtomicUsize,
    remaps: AtomicU64,
    rejected_remaps: AtomicU64,
    failed_allocations: AtomicU64,
}

impl HeapMetrics {
    fn increase_committed(&self, size: usize) {
        let previous = self.committed_bytes.fetch_add(size, Ordering::AcqRel);
        self.record_peak(previous + size);
    }

    fn decrease_committed(&self, size: usize) {
        saturating_sub(&self.committed_bytes, size);
    }

    fn record_peak(&self, candidate: usize) {
        self.peak_committed_bytes
            .fetch_max(candidate, Ordering::Relaxed);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(value))
    });
}
