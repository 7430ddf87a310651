use core::sync::atomic::{AtomicU64, Ordering};

use crate::{decision::TransferPath, substrate::SubstrateStats};

/// 引擎统计快照。
///
/// # 契约说明（What）
/// - 计数只增不减，读取时各字段之间不保证原子一致（与基座统计一样按 `Relaxed` 读取）；
/// - `direct_*` 与 `virtual_*` 只统计经过路径判定的缓冲间传递（`transfer` / `transfer_move`）；
/// - `fallbacks` 统计“判定为虚拟路径、但被基座拒绝后回退为直接拷贝”的次数，
///   这些传递同时计入 `direct_transfers`；
/// - `local_copies` / `local_bytes` 统计不经路径判定的拷贝：缓冲内区间搬移与切片暂存。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransferStats {
    pub direct_transfers: u64,
    pub virtual_transfers: u64,
    pub fallbacks: u64,
    pub direct_bytes: u64,
    pub virtual_bytes: u64,
    pub local_copies: u64,
    pub local_bytes: u64,
    pub zero_fills: u64,
    pub substrate: SubstrateStats,
}

#[derive(Debug, Default)]
pub(crate) struct EngineMetrics {
    direct_transfers: AtomicU64,
    virtual_transfers: AtomicU64,
    fallbacks: AtomicU64,
    direct_bytes: AtomicU64,
    virtual_bytes: AtomicU64,
    local_copies: AtomicU64,
    local_bytes: AtomicU64,
    zero_fills: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn record_transfer(&self, path: TransferPath, size: usize) {
        let (count, bytes) = match path {
            TransferPath::Direct => (&self.direct_transfers, &self.direct_bytes),
            TransferPath::Virtual => (&self.virtual_transfers, &self.virtual_bytes),
        };
        count.fetch_add(1, Ordering::Relaxed);
        bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_local_copy(&self, size: usize) {
        self.local_copies.fetch_add(1, Ordering::Relaxed);
        self.local_bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_zero_fill(&self) {
        self.zero_fills.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, substrate: SubstrateStats) -> TransferStats {
        TransferStats {
            direct_transfers: self.direct_transfers.load(Ordering::Relaxed),
            virtual_transfers: self.virtual_transfers.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            direct_bytes: self.direct_bytes.load(Ordering::Relaxed),
            virtual_bytes: self.virtual_bytes.load(Ordering::Relaxed),
            local_copies: self.local_copies.load(Ordering::Relaxed),
            local_bytes: self.local_bytes.load(Ordering::Relaxed),
            zero_fills: self.zero_fills.load(Ordering::Relaxed),
            substrate,
        }
    }
}
