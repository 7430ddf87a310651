//! 对齐感知的批量清零。
//!
//! 前导未对齐字节逐个清零，中段按机器字宽写入，尾部剩余字节再逐个清零；
//! 线性时间、常数因子低。无论采取何种策略，可观察结果都是“全部字节为 0”。
//!
//! 中段每块都是从常量 `ZERO_WORD` 拷贝的定长 `WORD` 字节，编译器将其降为单条字宽存储；
//! `ZeroFillPlan` 保证这些块从字对齐地址开始，因此每条存储都是对齐写。
//! 安全 Rust 无法把 `&mut [u8]` 重解释为 `&mut [usize]`，对齐由切分保证而非由类型保证。

use core::mem::{align_of, size_of};

const WORD: usize = size_of::<usize>();
const ZERO_WORD: [u8; WORD] = [0; WORD];

/// 将 `region` 的每个字节置零。
pub fn zero_fill(region: &mut [u8]) {
    let plan = ZeroFillPlan::for_region(region.as_ptr() as usize, region.len());
    let (head, rest) = region.split_at_mut(plan.head);
    let (body, tail) = rest.split_at_mut(plan.words * WORD);
    debug_assert_eq!(tail.len(), plan.tail);
    debug_assert!(body.is_empty() || body.as_ptr() as usize % align_of::<usize>() == 0);

    head.fill(0);
    for word in body.chunks_exact_mut(WORD) {
        word.copy_from_slice(&ZERO_WORD);
    }
    tail.fill(0);
}

/// 一段区域被拆分成的三部分长度（字节）。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct ZeroFillPlan {
    head: usize,
    words: usize,
    tail: usize,
}

impl ZeroFillPlan {
    fn for_region(address: usize, len: usize) -> Self {
        let misalignment = address % align_of::<usize>();
        let head = if misalignment == 0 {
            0
        } else {
            (align_of::<usize>() - misalignment).min(len)
        };
        let body = len - head;
        let words = body / WORD;
        Self {
            head,
            words,
            tail: body - words * WORD,
        }
    }
}
