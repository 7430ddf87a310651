use crate::error::TransferError;

/// 平台共享参数：决定虚拟传递（页重映射 / 写时复制）何时值得且合法。
///
/// # 设计背景（Why）
/// - 重映射整页只有在传递规模足以摊薄页表操作的固定成本时才划算，对应 `sharing_unit`；
/// - 部分平台因缓存索引或页着色限制，要求源、目的地址对 `associativity` 同余才能重映射。
///
/// # 契约说明（What）
/// - `sharing_unit == 0` 表示彻底禁用虚拟共享，所有传递都走直接拷贝；
/// - `associativity` 恒为正数，由 [`SharingParams::new`] 在构造时校验；
/// - 进程启动时读取一次，之后只读；以值的形式注入引擎，便于测试使用合成参数。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SharingParams {
    sharing_unit: usize,
    associativity: usize,
}

impl SharingParams {
    /// 默认共享单位：一页。
    pub const DEFAULT_UNIT: usize = 4096;
    /// 默认同余模数：1，即不施加地址着色约束。
    pub const DEFAULT_ASSOCIATIVITY: usize = 1;

    /// 校验并构造共享参数。
    ///
    /// # 错误
    /// - `associativity == 0` 时返回 [`TransferError::InvalidConfiguration`]。
    pub fn new(sharing_unit: usize, associativity: usize) -> Result<Self, TransferError> {
        if associativity == 0 {
            return Err(TransferError::InvalidConfiguration {
                detail: "sharing associativity must be positive".into(),
            });
        }
        Ok(Self {
            sharing_unit,
            associativity,
        })
    }

    /// 禁用虚拟共享的参数组合。
    pub const fn disabled() -> Self {
        Self {
            sharing_unit: 0,
            associativity: 1,
        }
    }

    /// 最小虚拟传递字节数；0 表示禁用。
    pub const fn sharing_unit(&self) -> usize {
        self.sharing_unit
    }

    /// 地址同余模数。
    pub const fn associativity(&self) -> usize {
        self.associativity
    }

    /// 是否允许任何虚拟传递。
    pub const fn is_enabled(&self) -> bool {
        self.sharing_unit != 0
    }

    /// 两个地址是否落在同一同余类。
    pub const fn congruent(&self, source_address: usize, destination_address: usize) -> bool {
        source_address % self.associativity == destination_address % self.associativity
    }

    /// 判定一次传递是否应走虚拟路径。
    ///
    /// 只读取参数本身，不关心缓冲内容；相同输入恒得相同结果。
    pub const fn choose_virtual(
        &self,
        source_address: usize,
        destination_address: usize,
        size: usize,
    ) -> bool {
        self.sharing_unit != 0
            && size >= self.sharing_unit
            && self.congruent(source_address, destination_address)
    }

    /// 返回 `destination_address` 需要前移的最小字节数，使其与 `source_address` 同余。
    ///
    /// 供希望避开直接拷贝回退的调用方在分配编组区时对齐起始位置。
    pub const fn congruent_offset(&self, source_address: usize, destination_address: usize) -> usize {
        let want = source_address % self.associativity;
        let have = destination_address % self.associativity;
        (want + self.associativity - have) % self.associativity
    }
}

impl Default for SharingParams {
    fn default() -> Self {
        Self {
            sharing_unit: Self::DEFAULT_UNIT,
            associativity: Self::DEFAULT_ASSOCIATIVITY,
        }
    }
}
