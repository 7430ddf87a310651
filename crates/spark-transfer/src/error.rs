//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义传递核心对调用方暴露的全部错误语义：参数违规、内存不足、释放后使用、底层内存基座失败；
//! - 为每个变体提供稳定错误码，便于编组层、命名服务等消费方按码值做告警与降级。
//!
//! ## 传播策略（What）
//! - 参数与生命周期违规属于客户端编程错误，一律同步返回给直接调用方，不做静默恢复；
//! - 虚拟传递阶段的基座失败由引擎在本地吸收并回退到直接拷贝，只有直接拷贝本身失败才会外抛；
//! - 其余错误原样上抛。

use thiserror::Error;

use crate::buffer::BufferId;

/// 稳定错误码，遵循 `<域>.<语义>` 命名约定。
pub mod codes {
    /// 参数违规：零长度、越界、尺寸不对称、区间重叠等。
    pub const INVALID_ARGUMENT: &str = "transfer.invalid_argument";
    /// 内存基座无法满足分配或复制请求。
    pub const OUT_OF_MEMORY: &str = "transfer.out_of_memory";
    /// 对已释放句柄执行了操作。
    pub const USE_AFTER_RELEASE: &str = "transfer.use_after_release";
    /// 内存基座内部失败。
    pub const SUBSTRATE_FAILURE: &str = "transfer.substrate_failure";
    /// 配置解析或校验失败。
    pub const INVALID_CONFIGURATION: &str = "transfer.invalid_configuration";
}

/// 传递核心的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把生命周期契约、传递决策与基座交互中的失败归并为一个可 `?` 传播的枚举；
/// - **契约 (What)**：
///   - 所有变体均 `Send + Sync + 'static`，可安全跨线程传递；
///   - [`TransferError::code`] 返回稳定码值，调用方不应解析 `Display` 文本做判定；
/// - **设计权衡 (Trade-offs)**：`reason`/`detail` 使用 `String`，以少量堆分配换取排障时的可读上下文。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TransferError {
    /// 调用方违反了操作前置条件。
    ///
    /// - `operation`：触发违规的操作名，例如 `"transfer"`、`"release"`；
    /// - `reason`：人类可读的违规描述。
    #[error("invalid argument to `{operation}`: {reason}")]
    InvalidArgument {
        operation: &'static str,
        reason: String,
    },

    /// 内存基座无法满足请求。
    ///
    /// `available` 为基座在失败时仍可提供的字节数；未设预算的基座被宿主分配器拒绝时为 0。
    #[error("out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    /// 句柄已处于 `Released` 终态。
    #[error("buffer {buffer} has already been released")]
    UseAfterRelease { buffer: BufferId },

    /// 内存基座报告的内部失败。
    ///
    /// 虚拟传递路径上的同类失败会被引擎吸收并回退，不会以该变体到达调用方。
    #[error("memory substrate failure: {detail}")]
    SubstrateFailure { detail: String },

    /// 配置无法解析或未通过校验。
    #[error("invalid transfer configuration: {detail}")]
    InvalidConfiguration { detail: String },
}

impl TransferError {
    /// 构造参数违规错误的便捷入口。
    pub fn invalid_argument(operation: &'static str, reason: impl Into<String>) -> Self {
        TransferError::InvalidArgument {
            operation,
            reason: reason.into(),
        }
    }

    /// 返回与变体对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidArgument { .. } => codes::INVALID_ARGUMENT,
            TransferError::OutOfMemory { .. } => codes::OUT_OF_MEMORY,
            TransferError::UseAfterRelease { .. } => codes::USE_AFTER_RELEASE,
            TransferError::SubstrateFailure { .. } => codes::SUBSTRATE_FAILURE,
            TransferError::InvalidConfiguration { .. } => codes::INVALID_CONFIGURATION,
        }
    }
}

/// 内存基座原语返回的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：基座实现者只需表达“内存不足”与“拒绝执行”两类结果，
///   由核心决定向上转换为 [`TransferError`] 还是本地回退；
/// - **契约 (What)**：`Rejected` 必须保证目标区域未被修改，否则引擎的直接拷贝回退将无法建立字节相等。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SubstrateError {
    /// 基座资源耗尽。
    #[error("substrate exhausted: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    /// 平台拒绝执行请求的原语（例如重映射条件不满足）。
    #[error("substrate rejected request: {reason}")]
    Rejected { reason: String },
}

impl SubstrateError {
    /// 构造拒绝错误的便捷入口。
    pub fn rejected(reason: impl Into<String>) -> Self {
        SubstrateError::Rejected {
            reason: reason.into(),
        }
    }
}

impl From<SubstrateError> for TransferError {
    fn from(value: SubstrateError) -> Self {
        match value {
            SubstrateError::OutOfMemory {
                requested,
                available,
            } => TransferError::OutOfMemory {
                requested,
                available,
            },
            SubstrateError::Rejected { reason } => TransferError::SubstrateFailure { detail: reason },
        }
    }
}
