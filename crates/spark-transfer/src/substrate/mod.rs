//! 内存基座边界。
//!
//! # 模块定位（Why）
//! - 平台相关的页重映射、写保护与缺页复制都属于基座的职责；可移植的决策引擎与生命周期契约只依赖这里的窄接口；
//! - 所有“共享物理页却保持逻辑独立”的技巧都被收敛到 [`Region`] 的写路径中，调用方无法绕开。
//!
//! # 契约概要（What）
//! - `raw_duplicate` 与 `raw_virtual_transfer` 必须满足隔离不变式：共享期间读到相同字节，任一方写入后互不可见；
//! - `raw_virtual_transfer` 返回 `Err` 时不得修改目标区域，引擎依赖这一点回退到直接拷贝；
//! - 基座需自行串行化内部元数据，使不同句柄上的并发调用安全。

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};

use crate::{error::SubstrateError, params::SharingParams, zero::zero_fill};

mod heap;

pub use heap::HeapSubstrate;

bitflags! {
    /// 分配 / 复制请求的附加语义。
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct AllocFlags: u32 {
        /// 要求返回全零区域。
        const ZEROED = 1 << 0;
        /// 复制时立即做物理拷贝而非写时复制共享。
        const EAGER_COPY = 1 << 1;
    }
}

/// 分配位置提示，仅影响性能，不影响正确性。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum DomainHint {
    /// 无偏好。
    #[default]
    Anywhere,
    /// 靠近给定地址（通常取自另一缓冲）。
    Near(usize),
}

/// 基座统计快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubstrateStats {
    /// 仍未释放的区域数量。
    pub live_regions: usize,
    /// 已承诺给存活区域的逻辑字节数（写时复制共享也按完整长度计入）。
    pub committed_bytes: usize,
    /// 承诺字节的历史峰值。
    pub peak_committed_bytes: usize,
    /// 成功的重映射次数。
    pub remaps: u64,
    /// 被拒绝的重映射次数。
    pub rejected_remaps: u64,
    /// 因资源不足失败的分配 / 复制次数。
    pub failed_allocations: u64,
}

/// 基座原语集合。
///
/// # 教案式说明
/// - **意图 (Why)**：以 trait 对象形式注入引擎，测试可以替换为故障注入实现，生产可以替换为真正的页表后端；
/// - **契约 (What)**：
///   - `raw_allocate` 返回长度恰为 `size` 的区域；
///   - `raw_duplicate` 返回与 `source` 前 `size` 字节内容相同、且满足隔离不变式的新区域；
///   - `raw_release` 的 `size` 与创建时一致（由上层生命周期契约保证）；
///   - `raw_virtual_transfer` 成功后 `destination[..size] == source[..size]`，且二者此后写入互不可见；
///   - `sharing_params` 仅在引擎构造时读取一次。
pub trait MemorySubstrate: Send + Sync + 'static {
    /// 分配 `size` 字节。
    fn raw_allocate(
        &self,
        hint: DomainHint,
        size: usize,
        flags: AllocFlags,
    ) -> Result<Region, SubstrateError>;

    /// 复制 `source` 的前 `size` 字节。
    fn raw_duplicate(
        &self,
        source: &Region,
        size: usize,
        flags: AllocFlags,
    ) -> Result<Region, SubstrateError>;

    /// 归还区域。
    fn raw_release(&self, region: Region, size: usize);

    /// 以重映射方式把 `source[..size]` 传递到 `destination[..size]`。
    fn raw_virtual_transfer(
        &self,
        source: &Region,
        size: usize,
        destination: &mut Region,
    ) -> Result<(), SubstrateError>;

    /// 平台公布的共享参数。
    fn sharing_params(&self) -> SharingParams;

    /// 统计快照；不关心统计的基座可以沿用默认实现。
    fn statistics(&self) -> SubstrateStats {
        SubstrateStats::default()
    }
}

/// 基座管理的一段连续字节。
///
/// # 设计动机（Why）
/// - 底层存储为引用计数的 [`Bytes`]：复制与重映射只增加引用，读路径零拷贝；
/// - 写路径统一经由 [`Region::with_mut`]：若存储仍被其它区域共享，先物化一份私有副本再写，
///   这就是写时复制的“缺页”时刻；若已独占则原地写入。
///
/// # 契约说明（What）
/// - 长度在区域生命周期内不变；
/// - 任何写入都不会被共享同一存储的其它区域观察到。
#[derive(Debug)]
pub struct Region {
    bytes: Bytes,
}

impl Region {
    /// 以 `len` 个零字节新建独占区域。
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: BytesMut::zeroed(len).freeze(),
        }
    }

    /// 接管一段已初始化的存储。
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from(data),
        }
    }

    /// 拷贝 `data` 新建独占区域。
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// 区域长度。
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// 区域是否为空。
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 区域首字节地址，供路径判定使用。
    pub fn address(&self) -> usize {
        self.bytes.as_ptr() as usize
    }

    /// 只读视图。
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// 存储是否未与其它区域共享。
    pub fn is_exclusive(&self) -> bool {
        self.bytes.is_unique()
    }

    /// 两个区域是否落在同一段物理存储上。
    pub fn shares_backing_with(&self, other: &Region) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let (a_start, b_start) = (self.address(), other.address());
        a_start < b_start + other.len() && b_start < a_start + self.len()
    }

    /// 共享前 `len` 字节，得到一个写时复制的新区域。
    ///
    /// 调用方需保证 `len <= self.len()`。
    pub fn share_prefix(&self, len: usize) -> Region {
        Region {
            bytes: self.bytes.slice(..len),
        }
    }

    /// 以可写切片访问区域；共享中的存储会先被物化为私有副本。
    ///
    /// 闭包 panic 时，已物化的存储仍会被放回区域，长度保持不变。
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let owned = match core::mem::take(&mut self.bytes).try_into_mut() {
            Ok(exclusive) => exclusive,
            Err(shared) => BytesMut::from(shared.as_ref()),
        };
        let mut guard = Refreeze {
            slot: &mut self.bytes,
            owned,
        };
        f(&mut guard.owned)
    }

    /// 把区域全部置零。
    ///
    /// 存储被共享时直接换成新的零页，省去先复制再清零的开销。
    pub fn zero(&mut self) {
        if self.is_exclusive() {
            self.with_mut(zero_fill);
        } else {
            *self = Region::zeroed(self.len());
        }
    }
}

/// 写路径结束（含 unwind）时把可写存储冻结回原区域。
struct Refreeze<'a> {
    slot: &'a mut Bytes,
    owned: BytesMut,
}

impl Drop for Refreeze<'_> {
    fn drop(&mut self) {
        *self.slot = core::mem::take(&mut self.owned).freeze();
    }
}
