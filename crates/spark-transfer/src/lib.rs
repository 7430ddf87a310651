//! `spark-transfer` 是字节负载跨保护域传递的零拷贝核心。
//!
//! # 模块定位（Why）
//! - 编组层、命名服务结果暂存、数值服务参数传递等消费方都需要搬运变长字节缓冲：
//!   既要保证目的端与调用时刻的源端逐字节相同、此后互不影响，又要在平台支持时用页重映射替代多页拷贝；
//! - 本 crate 负责两件紧密耦合的事：选择直接拷贝还是虚拟传递的决策算法，
//!   以及带写时复制隔离不变式的缓冲生命周期契约（分配 / 复制 / 释放）。
//!
//! # 设计概要（How）
//! - [`params`]：平台共享参数 `sharing_unit` 与 `associativity`，以值的形式注入；
//! - [`decision`]：无状态的路径判定；
//! - [`substrate`]：内存基座窄接口与基于引用计数堆存储的参考实现 [`HeapSubstrate`]；
//! - [`buffer`]：只能移动的独占缓冲句柄，复制必须显式经由引擎完成；
//! - [`engine`]：对外入口 [`TransferEngine`]，汇集生命周期、传递与清零；
//! - [`zero`]：对齐感知的批量清零；
//! - [`config`]：启动期 TOML 配置。
//!
//! # 契约摘要（What）
//! - 隔离：`duplicate` 产生的缓冲与源缓冲在任一方写入后互不可见；
//! - 确定性：路径判定只依赖地址、长度与共享参数，从不读取缓冲内容；
//! - 尺寸对称：释放时的长度必须等于创建时的长度；
//! - 基座重映射失败由引擎吸收并回退直接拷贝，其余错误原样返回调用方。
//!
//! ```rust
//! use std::sync::Arc;
//! use spark_transfer::{
//!     AllocFlags, DomainHint, HeapSubstrate, SharingParams, TransferEngine, TransferFlags,
//! };
//!
//! let params = SharingParams::new(4096, 1).expect("合法参数");
//! let engine = TransferEngine::new(Arc::new(HeapSubstrate::new(params)));
//!
//! let mut source = engine.allocate(DomainHint::Anywhere, 8192, AllocFlags::empty())?;
//! source.write_at(0, b"payload")?;
//! let mut staging = engine.allocate(DomainHint::near(&source), 8192, AllocFlags::empty())?;
//! engine.transfer(&source, 8192, &mut staging, TransferFlags::empty())?;
//! assert_eq!(&staging.as_slice()?[..7], b"payload");
//!
//! engine.release(&mut source, 8192)?;
//! engine.release(&mut staging, 8192)?;
//! # Ok::<(), spark_transfer::TransferError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod params;
mod stats;
pub mod substrate;
pub mod zero;

pub use buffer::{Buffer, BufferId, BufferState};
pub use config::TransferConfig;
pub use decision::{TransferFlags, TransferPath, decide};
pub use engine::TransferEngine;
pub use error::{SubstrateError, TransferError};
pub use params::SharingParams;
pub use stats::TransferStats;
pub use substrate::{
    AllocFlags, DomainHint, HeapSubstrate, MemorySubstrate, Region, SubstrateStats,
};
pub use zero::zero_fill;

/// 传递核心统一的结果类型。
pub type Result<T, E = TransferError> = core::result::Result<T, E>;
