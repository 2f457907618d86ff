// ============================================================================
// src/vdso.rs - sigreturn トランポリンレジストリ
// ============================================================================
//! vDSO 常駐の sigreturn トランポリンの所在を記録する。
//!
//! - vDSO 像内のオフセット: ブート時に一度だけ登録されるグローバル値
//! - vDSO のベースアドレス: プロセスごとに異なり、アドレス空間の
//!   セットアップ時に登録される
//!
//! 認識器はここで解決済みのアドレスを明示的な引数として受け取るため、
//! サンプリングのホットパスはこのモジュールのロックに触れない。

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use spin::RwLock;

use crate::addr::UserAddr;

/// プロセスID (Newtype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ProcessId(u64);

impl ProcessId {
    pub const fn new(pid: u64) -> Self {
        Self(pid)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// vDSO 像内の sigreturn トランポリンオフセット（0 = 未登録）
static SIGTRAMP_OFFSET: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    /// プロセスごとの vDSO ベースアドレス
    static ref VDSO_BASES: RwLock<BTreeMap<ProcessId, UserAddr>> = RwLock::new(BTreeMap::new());
}

/// sigreturn トランポリンのオフセットを登録する（ブート時に一度）
pub fn register_sigtramp_offset(offset: u64) {
    SIGTRAMP_OFFSET.store(offset, Ordering::Release);
    log::debug!("vdso sigtramp offset registered: {:#x}", offset);
}

/// プロセスの vDSO ベースアドレスを登録する
pub fn set_process_vdso_base(pid: ProcessId, base: UserAddr) {
    VDSO_BASES.write().insert(pid, base);
    log::debug!("vdso base for pid {}: {:#x}", pid.as_u64(), base.as_u64());
}

/// プロセスの登録を破棄する（アドレス空間の破棄時）
pub fn clear_process_vdso_base(pid: ProcessId) {
    VDSO_BASES.write().remove(&pid);
}

/// プロセスの sigreturn トランポリンアドレスを解決する
///
/// オフセットとベースの両方が登録済み・非ゼロの場合のみ `Some`。
pub fn sigreturn_address(pid: ProcessId) -> Option<UserAddr> {
    let offset = SIGTRAMP_OFFSET.load(Ordering::Acquire);
    if offset == 0 {
        return None;
    }

    let bases = VDSO_BASES.read();
    let base = bases.get(&pid)?;
    if base.as_u64() == 0 {
        return None;
    }

    Some(UserAddr::new(base.as_u64().wrapping_add(offset)))
}
