//! 启动期配置。
//!
//! ### 设计目的（Why）
//! - 共享参数在进程启动时读取一次，之后只读；用 TOML 描述便于按部署环境覆盖页大小、着色模数与堆预算；
//! - 解析与校验集中在此处，引擎只接收已校验的 [`SharingParams`] 值。
//!
//! ### 格式（What）
//! ```toml
//! [sharing]
//! unit = 4096          # 0 表示禁用虚拟共享
//! associativity = 1    # 必须为正数
//!
//! [heap]
//! max_committed_bytes = 67108864   # 省略表示不设上限
//! ```

use serde::Deserialize;

use crate::{error::TransferError, params::SharingParams, substrate::HeapSubstrate};

/// 顶层配置。缺省的段与字段取默认值，未知字段视为错误。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    pub sharing: SharingSection,
    pub heap: HeapSection,
}

/// `[sharing]` 段。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SharingSection {
    pub unit: usize,
    pub associativity: usize,
}

impl Default for SharingSection {
    fn default() -> Self {
        Self {
            unit: SharingParams::DEFAULT_UNIT,
            associativity: SharingParams::DEFAULT_ASSOCIATIVITY,
        }
    }
}

/// `[heap]` 段。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HeapSection {
    pub max_committed_bytes: Option<usize>,
}

impl TransferConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(raw: &str) -> Result<Self, TransferError> {
        let config: TransferConfig =
            toml::from_str(raw).map_err(|err| TransferError::InvalidConfiguration {
                detail: err.to_string(),
            })?;
        config.sharing_params()?;
        Ok(config)
    }

    /// 转换为已校验的共享参数。
    pub fn sharing_params(&self) -> Result<SharingParams, TransferError> {
        SharingParams::new(self.sharing.unit, self.sharing.associativity)
    }

    /// 按配置构造堆基座。
    pub fn heap_substrate(&self) -> Result<HeapSubstrate, TransferError> {
        let substrate = HeapSubstrate::new(self.sharing_params()?);
        Ok(match self.heap.max_committed_bytes {
            Some(limit) => substrate.with_limit(limit),
            None => substrate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::MemorySubstrate;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TransferConfig::from_toml_str("").expect("空文档合法");
        assert_eq!(config, TransferConfig::default());
        assert_eq!(
            config.sharing_params().expect("默认参数合法"),
            SharingParams::default()
        );
    }

    #[test]
    fn sections_override_defaults() {
        let config = TransferConfig::from_toml_str(
            r#"
            [sharing]
            unit = 8192
            associativity = 64

            [heap]
            max_committed_bytes = 1024
            "#,
        )
        .expect("合法配置");
        let heap = config.heap_substrate().expect("构造堆基座");
        let params = heap.sharing_params();
        assert_eq!(params.sharing_unit(), 8192);
        assert_eq!(params.associativity(), 64);
        assert_eq!(config.heap.max_committed_bytes, Some(1024));
    }

    #[test]
    fn zero_associativity_is_a_configuration_error() {
        let err = TransferConfig::from_toml_str("[sharing]\nassociativity = 0\n")
            .expect_err("模数为 0 必须拒绝");
        assert_eq!(err.code(), crate::error::codes::INVALID_CONFIGURATION);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = TransferConfig::from_toml_str("[sharing]\npage = 4096\n")
            .expect_err("未知字段必须拒绝");
        assert!(matches!(err, TransferError::InvalidConfiguration { .. }));
    }
}
