//! `lifecycle_contract` 集成测试：从 crate 公开 API 验证缓冲生命周期契约。
//!
//! # 测试目标（Why）
//! - 分配 → 复制 → 释放的完整链路必须维持隔离不变式与尺寸对称；
//! - 重复释放、尺寸不对称、释放后使用均需以稳定错误码同步返回；
//! - 基座承诺字节与存活区域统计在显式释放与 `Drop` 兜底两条路径上都保持一致。

use std::{sync::Arc, thread};

use spark_transfer::{
    AllocFlags, Buffer, BufferState, DomainHint, HeapSubstrate, SharingParams, TransferEngine,
    TransferError, error::codes,
};

fn engine() -> TransferEngine {
    TransferEngine::new(Arc::new(HeapSubstrate::new(SharingParams::default())))
}

fn byte(buffer: &Buffer) -> u8 {
    buffer.as_slice().expect("缓冲应存活")[0]
}

fn set_byte(buffer: &mut Buffer, value: u8) {
    buffer.write_at(0, &[value]).expect("缓冲应存活");
}

/// 单字节缓冲的端到端场景：两次复制、交替写入、再次复制、全部释放、重新分配后逆序释放。
#[test]
fn single_byte_duplicate_scenario() {
    let engine = engine();
    let flags = AllocFlags::empty();

    let mut p1 = engine
        .allocate(DomainHint::Anywhere, 1, flags)
        .expect("分配 p1");
    set_byte(&mut p1, 0x11);

    let mut p2 = engine.duplicate(&p1, 1, flags).expect("复制 p2");
    let mut p3 = engine.duplicate(&p1, 1, flags).expect("复制 p3");

    set_byte(&mut p1, 0x12);
    assert_eq!(byte(&p2), 0x11);
    assert_eq!(byte(&p3), 0x11);

    set_byte(&mut p2, 0x21);
    assert_eq!(byte(&p1), 0x12);
    assert_eq!(byte(&p3), 0x11);

    engine.release(&mut p3, 1).expect("释放旧 p3");
    let mut p3 = engine.duplicate(&p1, 1, flags).expect("再次复制 p3");
    assert_eq!(byte(&p1), 0x12);
    assert_eq!(byte(&p3), 0x12);

    engine.release(&mut p1, 1).expect("释放 p1");
    engine.release(&mut p2, 1).expect("释放 p2");
    engine.release(&mut p3, 1).expect("释放 p3");

    let mut q1 = engine
        .allocate(DomainHint::Anywhere, 1, flags)
        .expect("重新分配 q1");
    let mut q2 = engine
        .allocate(DomainHint::near(&q1), 1, flags)
        .expect("重新分配 q2");
    engine.release(&mut q2, 1).expect("逆序释放 q2");
    engine.release(&mut q1, 1).expect("逆序释放 q1");

    let stats = engine.statistics();
    assert_eq!(stats.substrate.live_regions, 0);
    assert_eq!(stats.substrate.committed_bytes, 0);
}

/// 尺寸不对称返回参数错误且缓冲保持存活；重复释放返回释放后使用。
#[test]
fn release_symmetry_is_enforced() {
    let engine = engine();
    let mut buffer = engine
        .allocate(DomainHint::Anywhere, 32, AllocFlags::empty())
        .expect("分配");

    let err = engine.release(&mut buffer, 16).expect_err("尺寸不对称");
    assert_eq!(err.code(), codes::INVALID_ARGUMENT);
    assert_eq!(buffer.state(), BufferState::Live);

    engine.release(&mut buffer, 32).expect("对称释放");
    let err = engine.release(&mut buffer, 32).expect_err("重复释放");
    assert_eq!(
        err,
        TransferError::UseAfterRelease {
            buffer: buffer.id()
        }
    );
    assert_eq!(err.code(), codes::USE_AFTER_RELEASE);
}

/// 已释放句柄上的复制、传递、清零都必须拒绝。
#[test]
fn released_handles_reject_every_operation() {
    let engine = engine();
    let mut released = engine
        .allocate(DomainHint::Anywhere, 8, AllocFlags::empty())
        .expect("分配");
    engine.release(&mut released, 8).expect("释放");
    let mut live = engine
        .allocate(DomainHint::Anywhere, 8, AllocFlags::empty())
        .expect("分配");

    let use_after_release = |result: Result<(), TransferError>| {
        assert_eq!(
            result.expect_err("应拒绝").code(),
            codes::USE_AFTER_RELEASE
        );
    };
    use_after_release(
        engine
            .duplicate(&released, 8, AllocFlags::empty())
            .map(drop),
    );
    use_after_release(
        engine
            .transfer(&released, 8, &mut live, Default::default())
            .map(drop),
    );
    use_after_release(
        engine
            .transfer(&live, 8, &mut released, Default::default())
            .map(drop),
    );
    use_after_release(engine.zero_fill(&mut released));
    use_after_release(released.write_at(0, &[1]));
    assert_eq!(DomainHint::near(&released), DomainHint::Anywhere);
}

/// 预算耗尽时分配与复制均返回内存不足，释放后恢复。
#[test]
fn exhausted_substrate_reports_out_of_memory() {
    let substrate = HeapSubstrate::new(SharingParams::default()).with_limit(64);
    let engine = TransferEngine::new(Arc::new(substrate));

    let mut first = engine
        .allocate(DomainHint::Anywhere, 48, AllocFlags::empty())
        .expect("预算内分配");
    let err = engine
        .duplicate(&first, 48, AllocFlags::empty())
        .expect_err("复制同样计入承诺字节");
    assert_eq!(
        err,
        TransferError::OutOfMemory {
            requested: 48,
            available: 16
        }
    );
    assert!(
        engine
            .allocate(DomainHint::Anywhere, 17, AllocFlags::empty())
            .is_err()
    );

    engine.release(&mut first, 48).expect("释放");
    let mut second = engine
        .allocate(DomainHint::Anywhere, 64, AllocFlags::empty())
        .expect("释放后预算恢复");
    engine.release(&mut second, 64).expect("释放");
    assert_eq!(engine.statistics().substrate.failed_allocations, 2);
}

/// 宿主无法满足的超大请求返回内存不足，且不推高承诺字节。
#[test]
fn unsatisfiable_allocation_reports_out_of_memory() {
    let engine = engine();
    let size = isize::MAX as usize + 1;
    let err = engine
        .allocate(DomainHint::Anywhere, size, AllocFlags::empty())
        .expect_err("超出地址空间的分配必须失败");
    assert_eq!(
        err,
        TransferError::OutOfMemory {
            requested: size,
            available: 0
        }
    );
    assert_eq!(err.code(), codes::OUT_OF_MEMORY);

    let stats = engine.statistics().substrate;
    assert_eq!(stats.committed_bytes, 0);
    assert_eq!(stats.peak_committed_bytes, 0);
    assert_eq!(stats.live_regions, 0);
    assert_eq!(stats.failed_allocations, 1);

    let mut buffer = engine
        .allocate(DomainHint::Anywhere, 16, AllocFlags::empty())
        .expect("失败后仍可正常分配");
    engine.release(&mut buffer, 16).expect("释放");
}

/// 未显式释放的缓冲在 `Drop` 时归还基座。
#[test]
fn dropped_buffers_return_to_substrate() {
    let engine = engine();
    {
        let source = engine
            .allocate(DomainHint::Anywhere, 128, AllocFlags::empty())
            .expect("分配");
        let _copy = engine
            .duplicate(&source, 64, AllocFlags::empty())
            .expect("复制前缀");
        let stats = engine.statistics().substrate;
        assert_eq!(stats.live_regions, 2);
        assert_eq!(stats.committed_bytes, 192);
    }
    let stats = engine.statistics().substrate;
    assert_eq!(stats.live_regions, 0);
    assert_eq!(stats.committed_bytes, 0);
    assert_eq!(stats.peak_committed_bytes, 192);
}

/// 不同句柄上的并发分配、复制、释放互不干扰。
#[test]
fn concurrent_lifecycles_on_distinct_handles() {
    let engine = engine();
    thread::scope(|scope| {
        for worker in 0..8u8 {
            let engine = &engine;
            scope.spawn(move || {
                for round in 0..64u8 {
                    let mut original = engine
                        .allocate(DomainHint::Anywhere, 16, AllocFlags::empty())
                        .expect("分配");
                    original.write_at(0, &[worker, round]).expect("写入");
                    let mut copy = engine
                        .duplicate(&original, 16, AllocFlags::empty())
                        .expect("复制");
                    copy.write_at(0, &[0xFF]).expect("写入副本");
                    assert_eq!(&original.as_slice().expect("读取")[..2], &[worker, round]);
                    engine.release(&mut copy, 16).expect("释放副本");
                    engine.release(&mut original, 16).expect("释放原件");
                }
            });
        }
    });
    let stats = engine.statistics().substrate;
    assert_eq!(stats.live_regions, 0);
    assert_eq!(stats.committed_bytes, 0);
}
