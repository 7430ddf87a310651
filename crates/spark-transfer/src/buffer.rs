use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use std::sync::Arc;

use tracing::debug;

use crate::{
    error::TransferError,
    substrate::{DomainHint, MemorySubstrate, Region},
};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// 缓冲句柄的进程内唯一编号，仅用于诊断与错误上下文。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 以原始数值构造编号，供日志回放与测试使用。
    pub const fn from_raw(raw: u64) -> Self {
        BufferId(raw)
    }

    /// 原始数值。
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 缓冲生命周期状态。`Released` 为终态。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BufferState {
    /// 已分配或复制，尚未释放；可读写、可传递。
    Live,
    /// 已归还基座；除查询编号、长度与状态外的任何操作都返回 [`TransferError::UseAfterRelease`]。
    Released,
}

/// `Buffer` 是跨保护域传递的独占字节缓冲句柄。
///
/// # 设计动机（Why）
/// - 句柄只能移动、不能隐式克隆：持有者即所有者，转移句柄即转移所有权；
/// - 底层物理页可能与其它缓冲共享（复制或重映射产生），但这种共享对调用方不可见，
///   所有写入都经由 [`Region::with_mut`] 先完成写时复制，隔离由基座保证而非依赖调用方自律。
///
/// # 架构关系（How）
/// - `region` 为 `None` 即处于 `Released` 终态，之后的任何访问都返回 [`TransferError::UseAfterRelease`]；
/// - `substrate` 指向创建该缓冲的基座，显式释放与 `Drop` 兜底释放都通过它归还资源；
/// - `size` 记录创建时的长度，释放时用于校验尺寸对称。
///
/// # 契约说明（What）
/// - **创建**：仅由 [`TransferEngine::allocate`](crate::TransferEngine::allocate) 与
///   [`TransferEngine::duplicate`](crate::TransferEngine::duplicate) 产生；
/// - **释放**：[`TransferEngine::release`](crate::TransferEngine::release) 恰好一次，且尺寸与创建时一致；
/// - **兜底**：仍存活的缓冲被丢弃时自动归还基座，并输出一条 `debug` 事件提示调用方遗漏了显式释放。
///
/// # 风险与取舍（Trade-offs）
/// - 写操作要求 `&mut self`，同一句柄的并发写入在编译期即被拒绝；
///   跨线程共享只读句柄是安全的，因为读路径不触发任何内部可变状态。
pub struct Buffer {
    id: BufferId,
    size: usize,
    region: Option<Region>,
    substrate: Arc<dyn MemorySubstrate>,
}

impl Buffer {
    pub(crate) fn new(region: Region, substrate: Arc<dyn MemorySubstrate>) -> Self {
        Self {
            id: BufferId::next(),
            size: region.len(),
            region: Some(region),
            substrate,
        }
    }

    /// 句柄编号。
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// 创建时的字节长度；释放后仍返回原值，便于诊断。
    pub fn len(&self) -> usize {
        self.size
    }

    /// 长度是否为 0。生命周期契约不会产生空缓冲，该方法仅为对称性提供。
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 当前生命周期状态。
    pub fn state(&self) -> BufferState {
        if self.region.is_some() {
            BufferState::Live
        } else {
            BufferState::Released
        }
    }

    /// 首字节地址；已释放时返回错误。
    pub fn address(&self) -> Result<usize, TransferError> {
        Ok(self.region()?.address())
    }

    /// 只读视图。
    pub fn as_slice(&self) -> Result<&[u8], TransferError> {
        Ok(self.region()?.as_slice())
    }

    /// 复制全部内容。
    pub fn to_vec(&self) -> Result<Vec<u8>, TransferError> {
        self.as_slice().map(<[u8]>::to_vec)
    }

    /// 从 `offset` 起读取 `out.len()` 字节。
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<(), TransferError> {
        let bytes = self.as_slice()?;
        let end = checked_range("read_at", offset, out.len(), bytes.len())?;
        out.copy_from_slice(&bytes[offset..end]);
        Ok(())
    }

    /// 从 `offset` 起写入 `data`；共享中的存储会先物化为私有副本。
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), TransferError> {
        let size = self.size;
        let end = checked_range("write_at", offset, data.len(), size)?;
        self.region_mut()?
            .with_mut(|bytes| bytes[offset..end].copy_from_slice(data));
        Ok(())
    }

    /// 以可写切片访问整个缓冲。
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, TransferError> {
        Ok(self.region_mut()?.with_mut(f))
    }

    /// 是否与 `other` 共享物理存储（写时复制尚未物化）。
    ///
    /// 任一方已释放时返回 `false`。
    pub fn shares_backing_with(&self, other: &Buffer) -> bool {
        match (&self.region, &other.region) {
            (Some(a), Some(b)) => a.shares_backing_with(b),
            _ => false,
        }
    }

    pub(crate) fn region(&self) -> Result<&Region, TransferError> {
        self.region
            .as_ref()
            .ok_or(TransferError::UseAfterRelease { buffer: self.id })
    }

    pub(crate) fn region_mut(&mut self) -> Result<&mut Region, TransferError> {
        self.region
            .as_mut()
            .ok_or(TransferError::UseAfterRelease { buffer: self.id })
    }

    /// 生命周期契约的释放入口：校验状态与尺寸后归还基座。
    pub(crate) fn release(&mut self, size: usize) -> Result<(), TransferError> {
        if self.region.is_none() {
            return Err(TransferError::UseAfterRelease { buffer: self.id });
        }
        if size != self.size {
            return Err(TransferError::invalid_argument(
                "release",
                format!(
                    "buffer {} was created with {} bytes, release requested {size}",
                    self.id, self.size
                ),
            ));
        }
        if let Some(region) = self.region.take() {
            self.substrate.raw_release(region, size);
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            debug!(buffer = %self.id, size = self.size, "缓冲未显式释放，由 Drop 归还基座");
            self.substrate.raw_release(region, self.size);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("state", &self.state())
            .finish()
    }
}

impl DomainHint {
    /// 提示基座把新区域放在 `buffer` 附近；`buffer` 已释放时退化为 [`DomainHint::Anywhere`]。
    pub fn near(buffer: &Buffer) -> Self {
        buffer
            .address()
            .map_or(DomainHint::Anywhere, DomainHint::Near)
    }
}

/// 校验 `[offset, offset + len)` 落在 `bound` 之内，返回区间终点。
pub(crate) fn checked_range(
    operation: &'static str,
    offset: usize,
    len: usize,
    bound: usize,
) -> Result<usize, TransferError> {
    offset
        .checked_add(len)
        .filter(|end| *end <= bound)
        .ok_or_else(|| {
            TransferError::invalid_argument(
                operation,
                format!("range {offset}..{offset}+{len} exceeds {bound} bytes"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{params::SharingParams, substrate::HeapSubstrate};

    fn live(bytes: &[u8]) -> (Buffer, Arc<HeapSubstrate>) {
        let heap = Arc::new(HeapSubstrate::new(SharingParams::default()));
        let substrate: Arc<dyn MemorySubstrate> = heap.clone();
        (Buffer::new(Region::copy_from_slice(bytes), substrate), heap)
    }

    #[test]
    fn release_checks_size_then_state() {
        let (mut buffer, _heap) = live(&[1, 2, 3]);
        let err = buffer.release(4).expect_err("尺寸不对称必须拒绝");
        assert_eq!(err.code(), crate::error::codes::INVALID_ARGUMENT);
        assert_eq!(buffer.state(), BufferState::Live);

        buffer.release(3).expect("首次释放应成功");
        assert_eq!(buffer.state(), BufferState::Released);
        assert_eq!(
            buffer.release(3),
            Err(TransferError::UseAfterRelease { buffer: buffer.id() })
        );
    }

    #[test]
    fn accessors_fail_after_release() {
        let (mut buffer, _heap) = live(&[0; 4]);
        buffer.release(4).expect("释放应成功");
        assert!(buffer.as_slice().is_err());
        assert!(buffer.write_at(0, &[1]).is_err());
        assert!(buffer.address().is_err());
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn out_of_range_access_is_invalid_argument() {
        let (mut buffer, _heap) = live(&[0; 4]);
        let mut out = [0u8; 2];
        assert!(buffer.read_at(3, &mut out).is_err());
        assert!(buffer.write_at(usize::MAX, &[1]).is_err());
        buffer.write_at(2, &[7, 8]).expect("边界内写入");
        buffer.read_at(2, &mut out).expect("边界内读取");
        assert_eq!(out, [7, 8]);
    }

    #[test]
    fn buffer_survives_panicking_writer() {
        let (mut buffer, heap) = live(&[2u8; 16]);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            buffer.with_mut(|_| -> usize { panic!("writer failed") })
        }));
        assert!(outcome.is_err());
        assert_eq!(buffer.as_slice().expect("仍存活").len(), 16);
        let mut out = [0u8; 1];
        buffer.read_at(0, &mut out).expect("读取不受影响");
        assert_eq!(out, [2]);
        buffer.release(16).expect("尺寸仍对称");
        assert_eq!(heap.statistics().live_regions, 0);
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ha) = live(&[0]);
        let (b, _hb) = live(&[0]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().to_string(), format!("#{}", a.id().as_raw()));
    }
}
