// ============================================================================
// src/uaccess.rs - 安全なユーザーメモリリーダー
// ============================================================================
//! 信頼できないユーザーアドレスからの1ワード読み取り。
//!
//! 割り込みコンテキストから通常のフォールト処理を起動するのは安全で
//! ないため、高速パス（フォールト許容の直接コピー）が失敗した場合は
//! ページテーブルを自力で引き、物理フレームの線形エイリアスから
//! 直接コピーする低速パスへフォールバックする。
//!
//! ユーザー制御のアドレスに対する生ポインタアクセスはこのモジュールの
//! 外では一切許可されない。

use crate::addr::{PAGE_SHIFT, TASK_SIZE, UserAddr, WORD_SIZE};
use crate::error::Fault;
use crate::irq::IrqGuard;
use crate::pgtable::{PageTables, PteFlags};

/// フォールト許容のユーザーコピー（高速パス）
///
/// 通常のフォールト処理機構が使える文脈でのみ成功し得る。
/// 失敗は即座に報告され、部分コピーは残さない。
pub trait NoFaultCopy {
    fn copy_from_user(&self, addr: UserAddr, buf: &mut [u8]) -> Result<(), Fault>;
}

/// 1ワード読み取りの境界
///
/// 認識器とウォーカーが消費する唯一のシーム。テストでは
/// モックメモリで差し替えられる。
pub trait ReadUserWord {
    fn read_word(&self, addr: UserAddr) -> Result<u64, Fault>;
}

/// ユーザースタックリーダー
///
/// 高速パスと低速パスを束ね、整列・範囲の前提条件を強制する。
pub struct UserStackReader<'a, F: ?Sized, P: ?Sized> {
    fast: &'a F,
    tables: &'a P,
}

impl<'a, F, P> UserStackReader<'a, F, P>
where
    F: NoFaultCopy + ?Sized,
    P: PageTables + ?Sized,
{
    /// リーダーを構築する
    ///
    /// アドレス空間ルートが欠けているスレッドはウォーク不可。
    /// フレームを1つも読む前に `NoAddressSpace` で拒否する。
    pub fn new(fast: &'a F, tables: &'a P) -> Result<Self, Fault> {
        if !tables.root_present() {
            return Err(Fault::NoAddressSpace);
        }
        Ok(Self { fast, tables })
    }

    /// `addr` から1ワード読み取る
    ///
    /// 前提条件違反（範囲外・不整列）は読み取りを試みずに報告する。
    pub fn read_word(&self, addr: UserAddr) -> Result<u64, Fault> {
        if addr.as_u64() > TASK_SIZE - WORD_SIZE {
            return Err(Fault::OutOfRange);
        }
        if !addr.is_aligned(WORD_SIZE) {
            return Err(Fault::Misaligned);
        }

        let mut buf = [0u8; WORD_SIZE as usize];
        if self.fast.copy_from_user(addr, &mut buf).is_ok() {
            return Ok(u64::from_ne_bytes(buf));
        }

        self.read_slow(addr, &mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// 低速パス: ページテーブルを引いて物理フレームから直接コピー
    ///
    /// 変換構造を安定させるため、ウィンドウ全体でローカル割り込みを
    /// 禁止する。ガードにより全脱出パスで復元される。
    fn read_slow(&self, addr: UserAddr, buf: &mut [u8]) -> Result<(), Fault> {
        let _irq = IrqGuard::save_and_disable();

        let mapping = self.tables.find_mapping(addr).ok_or(Fault::NoMapping)?;

        // shift == 0 はベースページの意味
        let shift = if mapping.shift == 0 {
            PAGE_SHIFT
        } else {
            mapping.shift
        };

        let flags = mapping.pte.flags();
        if !flags.contains(PteFlags::PRESENT) {
            return Err(Fault::NotPresent);
        }
        if !flags.contains(PteFlags::USER) {
            return Err(Fault::KernelOnly);
        }

        let pfn = mapping.pte.pfn();
        if !self.tables.page_is_ram(pfn) {
            return Err(Fault::NotRam);
        }

        // ページ内オフセット
        let offset = (addr.as_u64() & ((1u64 << shift) - 1)) as usize;

        let alias = self
            .tables
            .frame_alias(pfn, 1usize << shift)
            .ok_or(Fault::NoMapping)?;
        let bytes = alias
            .get(offset..offset + buf.len())
            .ok_or(Fault::NoMapping)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }
}

impl<'a, F, P> ReadUserWord for UserStackReader<'a, F, P>
where
    F: NoFaultCopy + ?Sized,
    P: PageTables + ?Sized,
{
    #[inline]
    fn read_word(&self, addr: UserAddr) -> Result<u64, Fault> {
        UserStackReader::read_word(self, addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{PAGE_SIZE, Pfn};
    use crate::pgtable::{Mapping, PageEntry};
    use alloc::collections::BTreeMap;
    use alloc::vec;
    use alloc::vec::Vec;

    /// 高速パスのモック: 指定アドレス集合だけ直接読める
    struct FastMem {
        words: BTreeMap<u64, u64>,
    }

    impl NoFaultCopy for FastMem {
        fn copy_from_user(&self, addr: UserAddr, buf: &mut [u8]) -> Result<(), Fault> {
            let word = self.words.get(&addr.as_u64()).ok_or(Fault::BadCopy)?;
            buf.copy_from_slice(&word.to_ne_bytes());
            Ok(())
        }
    }

    /// 何も読めない高速パス（低速パス強制用）
    struct FaultingFast;

    impl NoFaultCopy for FaultingFast {
        fn copy_from_user(&self, _addr: UserAddr, _buf: &mut [u8]) -> Result<(), Fault> {
            Err(Fault::BadCopy)
        }
    }

    /// ページテーブルのモック
    struct MockTables {
        root: bool,
        // 仮想ページ番号 -> (Mapping, フレーム内容)
        pages: BTreeMap<u64, (Mapping, Vec<u8>)>,
        ram: bool,
    }

    impl MockTables {
        fn new() -> Self {
            Self {
                root: true,
                pages: BTreeMap::new(),
                ram: true,
            }
        }

        /// `base` から始まるベースページを追加し、`word_off` に値を置く
        fn add_page(&mut self, base: u64, flags: PteFlags, fills: &[(usize, u64)]) {
            let pfn = Pfn::new(base >> PAGE_SHIFT);
            let mut data = vec![0u8; PAGE_SIZE];
            for &(off, val) in fills {
                data[off..off + 8].copy_from_slice(&val.to_ne_bytes());
            }
            let mapping = Mapping {
                pte: PageEntry::new(pfn, flags),
                shift: 0,
            };
            self.pages.insert(base >> PAGE_SHIFT, (mapping, data));
        }
    }

    impl PageTables for MockTables {
        fn root_present(&self) -> bool {
            self.root
        }

        fn find_mapping(&self, addr: UserAddr) -> Option<Mapping> {
            self.pages
                .get(&(addr.as_u64() >> PAGE_SHIFT))
                .map(|(m, _)| *m)
        }

        fn page_is_ram(&self, _pfn: Pfn) -> bool {
            self.ram
        }

        fn frame_alias(&self, pfn: Pfn, len: usize) -> Option<&[u8]> {
            let (_, data) = self.pages.values().find(|(m, _)| m.pte.pfn() == pfn)?;
            data.get(..len)
        }
    }

    const BASE: u64 = 0x10_0000;
    const UFLAGS: PteFlags = PteFlags::PRESENT.union(PteFlags::USER);

    #[test]
    fn test_fast_path_reads_value() {
        let fast = FastMem {
            words: BTreeMap::from([(BASE, 0xdead_beef_cafe_f00d)]),
        };
        let tables = MockTables::new();
        let reader = UserStackReader::new(&fast, &tables).unwrap();
        assert_eq!(
            reader.read_word(UserAddr::new(BASE)),
            Ok(0xdead_beef_cafe_f00d)
        );
    }

    #[test]
    fn test_slow_path_fallback_agrees_with_fast() {
        let value = 0x1122_3344_5566_7788u64;
        let off = 0x240usize;

        let fast = FastMem {
            words: BTreeMap::from([(BASE + off as u64, value)]),
        };
        let mut tables = MockTables::new();
        tables.add_page(BASE, UFLAGS, &[(off, value)]);

        let via_fast = UserStackReader::new(&fast, &tables)
            .unwrap()
            .read_word(UserAddr::new(BASE + off as u64));

        let via_slow = UserStackReader::new(&FaultingFast, &tables)
            .unwrap()
            .read_word(UserAddr::new(BASE + off as u64));

        assert_eq!(via_fast, Ok(value));
        assert_eq!(via_fast, via_slow);
    }

    #[test]
    fn test_misaligned_rejected_without_read() {
        let tables = MockTables::new();
        let reader = UserStackReader::new(&FaultingFast, &tables).unwrap();
        assert_eq!(
            reader.read_word(UserAddr::new(BASE + 4)),
            Err(Fault::Misaligned)
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        let tables = MockTables::new();
        let reader = UserStackReader::new(&FaultingFast, &tables).unwrap();
        assert_eq!(
            reader.read_word(UserAddr::new(TASK_SIZE)),
            Err(Fault::OutOfRange)
        );
        // 上限ちょうどの1ワードは読めない（末尾がはみ出す）
        assert_eq!(
            reader.read_word(UserAddr::new(TASK_SIZE - 4)),
            Err(Fault::OutOfRange)
        );
        assert!(
            reader.read_word(UserAddr::new(TASK_SIZE - 8)).is_err()
                && reader.read_word(UserAddr::new(TASK_SIZE - 8)) != Err(Fault::OutOfRange)
        );
    }

    #[test]
    fn test_unmapped_faults() {
        let tables = MockTables::new();
        let reader = UserStackReader::new(&FaultingFast, &tables).unwrap();
        assert_eq!(
            reader.read_word(UserAddr::new(BASE)),
            Err(Fault::NoMapping)
        );
    }

    #[test]
    fn test_not_present_faults() {
        let mut tables = MockTables::new();
        tables.add_page(BASE, PteFlags::USER, &[(0, 1)]);
        let reader = UserStackReader::new(&FaultingFast, &tables).unwrap();
        assert_eq!(
            reader.read_word(UserAddr::new(BASE)),
            Err(Fault::NotPresent)
        );
    }

    #[test]
    fn test_kernel_only_faults() {
        let mut tables = MockTables::new();
        tables.add_page(BASE, PteFlags::PRESENT, &[(0, 1)]);
        let reader = UserStackReader::new(&FaultingFast, &tables).unwrap();
        assert_eq!(
            reader.read_word(UserAddr::new(BASE)),
            Err(Fault::KernelOnly)
        );
    }

    #[test]
    fn test_non_ram_frame_faults() {
        let mut tables = MockTables::new();
        tables.add_page(BASE, UFLAGS, &[(0, 1)]);
        tables.ram = false;
        let reader = UserStackReader::new(&FaultingFast, &tables).unwrap();
        assert_eq!(reader.read_word(UserAddr::new(BASE)), Err(Fault::NotRam));
    }

    #[test]
    fn test_missing_root_rejects_reader() {
        let mut tables = MockTables::new();
        tables.root = false;
        assert!(matches!(
            UserStackReader::new(&FaultingFast, &tables),
            Err(Fault::NoAddressSpace)
        ));
    }
}
