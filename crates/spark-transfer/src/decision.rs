use core::fmt;

use bitflags::bitflags;

use crate::params::SharingParams;

bitflags! {
    /// 传递调用的行为开关。
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct TransferFlags: u32 {
        /// 不咨询基座的重映射原语，始终直接拷贝。
        const FORCE_DIRECT = 1 << 0;
    }
}

/// 一次传递所走的路径。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransferPath {
    /// 逐字节直接拷贝。
    Direct,
    /// 委派给内存基座的重映射 / 写时复制原语。
    Virtual,
}

impl TransferPath {
    /// 供日志字段使用的短名称。
    pub const fn as_str(self) -> &'static str {
        match self {
            TransferPath::Direct => "direct",
            TransferPath::Virtual => "virtual",
        }
    }
}

impl fmt::Display for TransferPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 纯函数式的路径判定。
///
/// # 教案式说明
/// - **意图 (Why)**：把“是否值得、是否合法地重映射”与执行动作分离，调用方可以在分配编组区之前预测路径；
/// - **逻辑 (How)**：`FORCE_DIRECT` 优先；否则按 [`SharingParams::choose_virtual`] 的三个条件判定；
/// - **契约 (What)**：结果只依赖地址、长度、参数与标志，绝不读取缓冲内容。
pub fn decide(
    params: &SharingParams,
    source_address: usize,
    destination_address: usize,
    size: usize,
    flags: TransferFlags,
) -> TransferPath {
    if flags.contains(TransferFlags::FORCE_DIRECT) {
        return TransferPath::Direct;
    }
    if params.choose_virtual(source_address, destination_address, size) {
        TransferPath::Virtual
    } else {
        TransferPath::Direct
    }
}
