use std::{fmt, sync::Arc};

use tracing::{debug, trace, warn};

use crate::{
    buffer::{Buffer, checked_range},
    config::TransferConfig,
    decision::{TransferFlags, TransferPath, decide},
    error::TransferError,
    params::SharingParams,
    stats::{EngineMetrics, TransferStats},
    substrate::{AllocFlags, DomainHint, MemorySubstrate, Region},
};

/// `TransferEngine` 汇集缓冲生命周期契约与传递决策，是编组层、命名服务暂存等消费方的唯一入口。
///
/// # 模块角色（Why）
/// - 对上暴露 `allocate` / `duplicate` / `release` / `transfer` / `zero_fill` 以及只读的共享参数；
/// - 对下只通过 [`MemorySubstrate`] 的窄接口与平台交互，本类型自身不含任何 `unsafe` 操作。
///
/// # 核心机制（How）
/// - 构造时从基座读取一次 [`SharingParams`]（或由调用方注入合成值），之后不再变化；
/// - `transfer` 先校验参数，再以 [`decide`] 判定路径：虚拟路径委派基座重映射，
///   基座拒绝时记录 `warn` 事件与回退计数并改走直接拷贝；直接拷贝总是可行的兜底；
/// - `EngineMetrics` 以原子计数记录各路径的次数与字节数，`statistics` 汇总基座快照后返回。
///
/// # 契约说明（What）
/// - **同步**：全部操作同步完成，不挂起、不重试、不涉及超时；
/// - **线程安全**：引擎为 `Send + Sync`，不同句柄上的并发调用安全；同一句柄的可变访问受借用规则约束；
/// - **失败语义**：参数违规与生命周期违规同步返回；部分写入不回滚，调用方不能假定失败原子性。
pub struct TransferEngine {
    substrate: Arc<dyn MemorySubstrate>,
    params: SharingParams,
    metrics: EngineMetrics,
}

impl TransferEngine {
    /// 以基座公布的共享参数构造引擎。
    pub fn new(substrate: Arc<dyn MemorySubstrate>) -> Self {
        let params = substrate.sharing_params();
        Self::with_params(substrate, params)
    }

    /// 以显式注入的共享参数构造引擎，常用于测试合成的对齐边界。
    pub fn with_params(substrate: Arc<dyn MemorySubstrate>, params: SharingParams) -> Self {
        debug!(
            sharing_unit = params.sharing_unit(),
            associativity = params.associativity(),
            "传递引擎已就绪"
        );
        Self {
            substrate,
            params,
            metrics: EngineMetrics::default(),
        }
    }

    /// 按配置构造以堆基座为后端的引擎。
    pub fn from_config(config: &TransferConfig) -> Result<Self, TransferError> {
        let substrate: Arc<dyn MemorySubstrate> = Arc::new(config.heap_substrate()?);
        Ok(Self::new(substrate))
    }

    /// 只读共享参数，供希望预先定长以避开直接拷贝回退的调用方使用。
    pub fn params(&self) -> SharingParams {
        self.params
    }

    /// 预测一次传递的路径，不执行任何动作。
    pub fn decide(
        &self,
        source_address: usize,
        destination_address: usize,
        size: usize,
        flags: TransferFlags,
    ) -> TransferPath {
        decide(
            &self.params,
            source_address,
            destination_address,
            size,
            flags,
        )
    }

    /// 分配 `size` 字节的新缓冲。
    ///
    /// # 错误
    /// - `size == 0`：[`TransferError::InvalidArgument`]；
    /// - 基座资源耗尽：[`TransferError::OutOfMemory`]。
    pub fn allocate(
        &self,
        hint: DomainHint,
        size: usize,
        flags: AllocFlags,
    ) -> Result<Buffer, TransferError> {
        if size == 0 {
            return Err(TransferError::invalid_argument(
                "allocate",
                "size must be non-zero",
            ));
        }
        let region = self.substrate.raw_allocate(hint, size, flags)?;
        let buffer = Buffer::new(region, Arc::clone(&self.substrate));
        trace!(buffer = %buffer.id(), size, "缓冲已分配");
        Ok(buffer)
    }

    /// 复制 `source` 的前 `size` 字节为新缓冲。
    ///
    /// # 契约说明（What）
    /// - 新缓冲初始内容与源相同；此后任一方写入都不会被另一方观察到，
    ///   无论基座采用物理拷贝还是写时复制共享；
    /// - 要求 `0 < size <= source.len()`，源必须仍存活。
    pub fn duplicate(
        &self,
        source: &Buffer,
        size: usize,
        flags: AllocFlags,
    ) -> Result<Buffer, TransferError> {
        let region = source.region()?;
        if size == 0 || size > region.len() {
            return Err(TransferError::invalid_argument(
                "duplicate",
                format!(
                    "size {size} is outside 1..={} for buffer {}",
                    region.len(),
                    source.id()
                ),
            ));
        }
        let copy = self.substrate.raw_duplicate(region, size, flags)?;
        let buffer = Buffer::new(copy, Arc::clone(&self.substrate));
        trace!(source = %source.id(), buffer = %buffer.id(), size, "缓冲已复制");
        Ok(buffer)
    }

    /// 归还缓冲。`size` 必须等于创建时的长度。
    ///
    /// # 错误
    /// - 重复释放：[`TransferError::UseAfterRelease`]；
    /// - 尺寸不对称：[`TransferError::InvalidArgument`]，缓冲保持存活。
    pub fn release(&self, buffer: &mut Buffer, size: usize) -> Result<(), TransferError> {
        buffer.release(size)?;
        trace!(buffer = %buffer.id(), size, "缓冲已释放");
        Ok(())
    }

    /// 把 `source[..size]` 传递到 `destination[..size]`，返回实际采用的路径。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：大块、地址同余的传递交给基座重映射，其余情况直接拷贝更便宜；
    /// - **执行 (How)**：
    ///   1. 校验两端存活、`size > 0` 且不超过任一端长度；
    ///   2. 按共享参数与标志判定路径；
    ///   3. 虚拟路径失败时回退直接拷贝，回退不向调用方暴露错误；
    /// - **契约 (What)**：返回后 `destination[..size]` 等于调用时刻的 `source[..size]`，
    ///   两者此后写入互不可见。源与目的是不同句柄，借用规则已排除重叠。
    pub fn transfer(
        &self,
        source: &Buffer,
        size: usize,
        destination: &mut Buffer,
        flags: TransferFlags,
    ) -> Result<TransferPath, TransferError> {
        let source_region = source.region()?;
        let destination_region = destination.region_mut()?;
        validate_transfer_size(size, source_region.len(), destination_region.len())?;

        let path = decide(
            &self.params,
            source_region.address(),
            destination_region.address(),
            size,
            flags,
        );
        trace!(size, path = %path, "传递路径已判定");

        if path == TransferPath::Virtual {
            match self
                .substrate
                .raw_virtual_transfer(source_region, size, destination_region)
            {
                Ok(()) => {
                    self.metrics.record_transfer(TransferPath::Virtual, size);
                    return Ok(TransferPath::Virtual);
                }
                Err(err) => {
                    warn!(error = %err, size, "基座拒绝虚拟传递，回退为直接拷贝");
                    self.metrics.record_fallback();
                }
            }
        }

        direct_copy(source_region, size, destination_region);
        self.metrics.record_transfer(TransferPath::Direct, size);
        Ok(TransferPath::Direct)
    }

    /// 传递后清零源缓冲的前 `size` 字节，适用于传出后不得残留负载的编组区。
    ///
    /// 目的端在两条路径上都保留负载：源清零同样经由写时复制，不会波及共享存储的目的端。
    pub fn transfer_move(
        &self,
        source: &mut Buffer,
        size: usize,
        destination: &mut Buffer,
        flags: TransferFlags,
    ) -> Result<TransferPath, TransferError> {
        let path = self.transfer(source, size, destination, flags)?;
        let region = source.region_mut()?;
        if size == region.len() {
            region.zero();
        } else {
            region.with_mut(|bytes| crate::zero::zero_fill(&mut bytes[..size]));
        }
        self.metrics.record_zero_fill();
        Ok(path)
    }

    /// 同一缓冲内的区间传递，始终直接拷贝；计入 `local_copies` 而非路径统计。
    ///
    /// # 错误
    /// - `size == 0`、区间越界或两区间重叠：[`TransferError::InvalidArgument`]。
    ///   重叠不做隐式的 memmove 语义，需要重叠搬移的调用方应先复制到独立缓冲。
    pub fn transfer_within(
        &self,
        buffer: &mut Buffer,
        source_offset: usize,
        destination_offset: usize,
        size: usize,
    ) -> Result<(), TransferError> {
        const OP: &str = "transfer_within";
        let len = buffer.region()?.len();
        if size == 0 {
            return Err(TransferError::invalid_argument(OP, "size must be non-zero"));
        }
        let source_end = checked_range(OP, source_offset, size, len)?;
        let destination_end = checked_range(OP, destination_offset, size, len)?;
        if source_offset < destination_end && destination_offset < source_end {
            return Err(TransferError::invalid_argument(
                OP,
                format!(
                    "source {source_offset}..{source_end} overlaps destination {destination_offset}..{destination_end}"
                ),
            ));
        }
        buffer.region_mut()?.with_mut(|bytes| {
            bytes.copy_within(source_offset..source_end, destination_offset);
        });
        self.metrics.record_local_copy(size);
        Ok(())
    }

    /// 把一段普通字节暂存到缓冲的 `offset` 处。借用切片没有基座背书，只能直接拷贝；计入 `local_copies`。
    pub fn transfer_from_slice(
        &self,
        source: &[u8],
        destination: &mut Buffer,
        offset: usize,
    ) -> Result<(), TransferError> {
        const OP: &str = "transfer_from_slice";
        if source.is_empty() {
            return Err(TransferError::invalid_argument(OP, "source slice is empty"));
        }
        let end = checked_range(OP, offset, source.len(), destination.region()?.len())?;
        destination
            .region_mut()?
            .with_mut(|bytes| bytes[offset..end].copy_from_slice(source));
        self.metrics.record_local_copy(source.len());
        Ok(())
    }

    /// 将缓冲全部置零。
    pub fn zero_fill(&self, buffer: &mut Buffer) -> Result<(), TransferError> {
        buffer.region_mut()?.zero();
        self.metrics.record_zero_fill();
        Ok(())
    }

    /// 引擎与基座的统计快照。
    pub fn statistics(&self) -> TransferStats {
        self.metrics.snapshot(self.substrate.statistics())
    }
}

impl fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEngine")
            .field("params", &self.params)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn validate_transfer_size(
    size: usize,
    source_len: usize,
    destination_len: usize,
) -> Result<(), TransferError> {
    if size == 0 {
        return Err(TransferError::invalid_argument(
            "transfer",
            "size must be non-zero",
        ));
    }
    if size > source_len || size > destination_len {
        return Err(TransferError::invalid_argument(
            "transfer",
            format!(
                "size {size} exceeds source ({source_len} bytes) or destination ({destination_len} bytes)"
            ),
        ));
    }
    Ok(())
}

fn direct_copy(source: &Region, size: usize, destination: &mut Region) {
    let payload = &source.as_slice()[..size];
    destination.with_mut(|bytes| bytes[..size].copy_from_slice(payload));
}
