// ============================================================================
// src/pgtable.rs - ページテーブルエントリモデルと変換ケーパビリティ
// ============================================================================
//! 低速パスが参照するアドレス変換の抽象。
//!
//! 実際のページテーブルウォークはメモリ管理サブシステム側にあり、
//! 本クレートは [`PageTables`] の狭いインターフェースだけを消費する。
//! テストではモック実装に差し替えられる。

use bitflags::bitflags;

use crate::addr::{PAGE_SHIFT, Pfn, UserAddr};

bitflags! {
    /// ページテーブルエントリの属性ビット
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// マッピングが有効
        const PRESENT  = 1 << 0;
        /// 書き込み可能
        const WRITABLE = 1 << 1;
        /// ユーザーモードからアクセス可能
        const USER     = 1 << 2;
        /// 参照済み
        const ACCESSED = 1 << 3;
        /// 書き込み済み
        const DIRTY    = 1 << 4;
    }
}

/// ページテーブルエントリ
///
/// 下位 `PAGE_SHIFT` ビットが属性、それより上が物理フレーム番号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry(u64);

impl PageEntry {
    #[inline]
    pub const fn new(pfn: Pfn, flags: PteFlags) -> Self {
        Self((pfn.as_u64() << PAGE_SHIFT) | flags.bits())
    }

    #[inline]
    pub const fn pfn(&self) -> Pfn {
        Pfn::new(self.0 >> PAGE_SHIFT)
    }

    #[inline]
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & ((1 << PAGE_SHIFT) - 1))
    }
}

/// 変換結果
///
/// `shift == 0` は「ベースページ」を意味し、消費側で `PAGE_SHIFT` に
/// 正規化される。ヒュージページでは実際のページシフトが入る。
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub pte: PageEntry,
    pub shift: u32,
}

/// アドレス変換ケーパビリティ
///
/// 現在のスレッドのアドレス空間に対する読み取り専用ビュー。
/// 本クレートは変換を一切変更しない。
pub trait PageTables {
    /// トップレベルのアドレス空間ルートが存在するか
    fn root_present(&self) -> bool;

    /// `addr` の変換エントリを引く
    ///
    /// ローカル割り込み禁止中にのみ呼ぶこと。変換構造が並行して
    /// 書き換わらないことを呼び出し側が保証する。
    fn find_mapping(&self, addr: UserAddr) -> Option<Mapping>;

    /// 物理フレームが通常のRAMか（デバイスマッピング等でないか）
    fn page_is_ram(&self, pfn: Pfn) -> bool;

    /// 物理フレームのカーネル線形エイリアス（長さ `len` バイト）
    fn frame_alias(&self, pfn: Pfn, len: usize) -> Option<&[u8]>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_entry_packing() {
        let pte = PageEntry::new(Pfn::new(0x1234), PteFlags::PRESENT | PteFlags::USER);
        assert_eq!(pte.pfn(), Pfn::new(0x1234));
        assert!(pte.flags().contains(PteFlags::PRESENT));
        assert!(pte.flags().contains(PteFlags::USER));
        assert!(!pte.flags().contains(PteFlags::WRITABLE));
    }

    #[test]
    fn test_flags_do_not_leak_into_pfn() {
        let pte = PageEntry::new(Pfn::new(7), PteFlags::all());
        assert_eq!(pte.pfn(), Pfn::new(7));
    }
}
