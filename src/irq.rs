// ============================================================================
// src/irq.rs - ローカル割り込み禁止ウィンドウ
//
// 問題: ページテーブルウォーク中に変換構造が書き換わると
//       読み取り途中のエントリが不整合になる
//
// 解決: ウォークの間だけローカル割り込みを禁止する
//       （ガードのドロップで必ず復元 → エラーパスでも閉じる）
//
// 参考: Linux の local_irq_save / local_irq_restore
// ============================================================================
#![allow(dead_code)]

/// MSR の External Interrupt Enable ビット
#[cfg(all(target_arch = "powerpc64", target_os = "none"))]
const MSR_EE: u64 = 1 << 15;

/// 現在のMSRを保存して外部割り込みを禁止
///
/// # Returns
/// 復元用の元MSR値
#[cfg(all(target_arch = "powerpc64", target_os = "none"))]
#[inline]
fn save_and_disable_interrupts() -> u64 {
    let msr: u64;

    unsafe {
        core::arch::asm!(
            "mfmsr {0}",
            out(reg) msr,
            options(nomem, preserves_flags)
        );
        core::arch::asm!(
            "mtmsrd {0}, 1",
            in(reg) msr & !MSR_EE,
            options(nomem, nostack)
        );
    }

    msr
}

/// 保存したMSRを書き戻して割り込み状態を復元
#[cfg(all(target_arch = "powerpc64", target_os = "none"))]
#[inline]
fn restore_interrupts(saved: u64) {
    unsafe {
        core::arch::asm!(
            "mtmsrd {0}, 1",
            in(reg) saved,
            options(nomem, nostack)
        );
    }
}

// ホストビルド（単体テスト）では割り込み制御は存在しない
#[cfg(not(all(target_arch = "powerpc64", target_os = "none")))]
#[inline]
fn save_and_disable_interrupts() -> u64 {
    0
}

#[cfg(not(all(target_arch = "powerpc64", target_os = "none")))]
#[inline]
fn restore_interrupts(_saved: u64) {}

/// 割り込み禁止ガード
///
/// 生成時にローカル割り込みを禁止し、ドロップ時に元の状態へ復元する。
/// `?` による早期リターンを含むすべての脱出パスで復元が保証される。
/// ウィンドウは可能な限り短く保つこと。
pub struct IrqGuard {
    saved: u64,
}

impl IrqGuard {
    /// 割り込みを禁止してガードを取得
    #[inline]
    pub fn save_and_disable() -> Self {
        Self {
            saved: save_and_disable_interrupts(),
        }
    }
}

impl Drop for IrqGuard {
    #[inline]
    fn drop(&mut self) {
        restore_interrupts(self.saved);
    }
}
