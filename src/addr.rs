// ============================================================================
// src/addr.rs - ユーザーアドレス空間の定数と Newtype
// ============================================================================
use core::fmt;

/// ベースページシフト（64KiB ページ）
pub const PAGE_SHIFT: u32 = 16;

/// ベースページサイズ
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// ユーザー空間の上限（64TiB）
pub const TASK_SIZE: u64 = 0x0000_4000_0000_0000;

/// ユーザースタックの上限
pub const STACK_TOP: u64 = TASK_SIZE;

/// 1ワードのバイト数
pub const WORD_SIZE: u64 = 8;

/// ユーザー仮想アドレス (Newtype)
///
/// 信頼できない数値。整列・マップ済み・範囲内であることは
/// 検証されるまで一切仮定しない。本クレート内で生のデリファレンスは
/// 許可されず、すべての読み取りは `uaccess` のリーダーを経由する。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserAddr(u64);

impl UserAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// `align` バイト境界に揃っているか（`align` は2のべき乗）
    #[inline]
    pub const fn is_aligned(&self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    /// バイトオフセットを加算（信頼できない算術なのでラップさせる）
    #[inline]
    pub const fn wrapping_add(&self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset))
    }
}

impl fmt::Debug for UserAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserAddr({:#x})", self.0)
    }
}

impl fmt::Display for UserAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 物理フレーム番号 (Newtype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pfn(u64);

impl Pfn {
    #[inline]
    pub const fn new(pfn: u64) -> Self {
        Self(pfn)
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// ユーザースタックポインタとして妥当か検査する
///
/// ゼロ・ワード境界不整列・スタック上限超過のいずれかで不当。
/// 不当なspはウォークの正常終了条件であり、エラーではない。
#[inline]
pub fn invalid_user_sp(sp: u64) -> bool {
    sp == 0 || sp & (WORD_SIZE - 1) != 0 || sp > STACK_TOP - 32
}
