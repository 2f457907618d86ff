// ============================================================================
// src/sigframe.rs - シグナルフレーム記述子と認識器
// ============================================================================
//! シグナル配送がユーザースタックに合成するフレームのレイアウトと、
//! 2つの連続フレーム間のギャップが通常の呼び出しフレームではなく
//! シグナルフレームに見えるかを判定する純粋な決定手続き。
//!
//! スタックの内容は信頼できないデータであり、トランポリンアドレスの
//! 一致だけでは偶然の一致と区別できない。そのため (1) サイズ検査、
//! (2) トランポリンアドレス検査、(3) フレーム内自己参照の構造確認、
//! の3段すべてを通過した場合にのみシグナル境界と分類する。

use core::mem::{offset_of, size_of};

use crate::addr::UserAddr;
use crate::uaccess::ReadUserWord;

/// シグナルフレーム先頭の固定パディング
pub const SIGNAL_FRAMESIZE: usize = 128;

/// 汎用レジスタ保存領域のエントリ数
pub const ELF_NGREG: usize = 48;

/// 保存領域内のスタックポインタ（r1）のインデックス
pub const REG_SP: u64 = 1;

/// 保存領域内の命令ポインタのインデックス
pub const REG_NIP: u64 = 32;

/// 保存領域内のリンクレジスタのインデックス
pub const REG_LNK: u64 = 36;

/// siginfo 本体（レイアウト計算にのみ使用、中身は解釈しない）
#[repr(C)]
pub struct SigInfo {
    _bytes: [u8; 128],
}

/// シグナルスタック記述子 (stack_t)
#[repr(C)]
pub struct StackDesc {
    _sp: u64,
    _flags: i32,
    _pad: i32,
    _size: u64,
}

/// マシンコンテキスト (sigcontext)
#[repr(C)]
pub struct SigContext {
    _unused: [u64; 4],
    _signal: i32,
    _pad0: i32,
    _handler: u64,
    _oldmask: u64,
    _regs: u64,
    _gp_regs: [u64; ELF_NGREG],
    _fp_regs: [u64; 33],
    _v_regs: u64,
    _vmx_reserve: [u64; 101],
}

/// ユーザーコンテキスト (ucontext)
#[repr(C)]
pub struct UContext {
    _flags: u64,
    _link: u64,
    _stack: StackDesc,
    _sigmask: u64,
    _unused_mask: [u64; 15],
    _mcontext: SigContext,
}

/// 64ビットシグナルフレーム
///
/// RTシグナルと非RTシグナルは同一のフレームを共有する。
/// 固定オフセット計算にのみ使用する読み取り専用レイアウト。
#[repr(C)]
pub struct SignalFrame {
    _dummy: [u8; SIGNAL_FRAMESIZE],
    _uc: UContext,
    _unused: [u64; 2],
    _tramp: [u32; 6],
    _pinfo: u64,
    _puc: u64,
    _info: SigInfo,
    _abigap: [u8; 288],
}

impl SignalFrame {
    /// フレーム全体のサイズ
    pub const SIZE: u64 = size_of::<SignalFrame>() as u64;

    /// 埋め込み ucontext のオフセット
    pub const UC_OFFSET: u64 = offset_of!(SignalFrame, _uc) as u64;

    /// トランポリンコード列のオフセット
    pub const TRAMP_OFFSET: u64 = offset_of!(SignalFrame, _tramp) as u64;

    /// `pinfo` ポインタフィールドのオフセット
    pub const PINFO_OFFSET: u64 = offset_of!(SignalFrame, _pinfo) as u64;

    /// `puc` ポインタフィールドのオフセット
    pub const PUC_OFFSET: u64 = offset_of!(SignalFrame, _puc) as u64;

    /// 埋め込み siginfo のオフセット
    pub const INFO_OFFSET: u64 = offset_of!(SignalFrame, _info) as u64;

    /// 汎用レジスタ保存領域のオフセット
    pub const GP_REGS_OFFSET: u64 = Self::UC_OFFSET
        + offset_of!(UContext, _mcontext) as u64
        + offset_of!(SigContext, _gp_regs) as u64;

    /// 保存領域内のレジスタ `index` のユーザーアドレス
    #[inline]
    pub fn saved_reg_addr(frame_base: u64, index: u64) -> UserAddr {
        UserAddr::new(
            frame_base
                .wrapping_add(Self::GP_REGS_OFFSET)
                .wrapping_add(index * 8),
        )
    }
}

/// フレーム区間の分類結果
///
/// ウォーカーの2状態（通常フレーム / シグナル遷移）はこの値で駆動される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// 通常の呼び出しフレーム
    Call,
    /// シグナル配送による合成フレーム
    SignalBoundary,
}

/// シグナルフレーム認識器
///
/// レジストリで解決済みのsigreturnトランポリンアドレス（vDSO内）と
/// ユーザーメモリリーダーを保持する。判定自体は純粋で、リーダーを
/// モックすればページテーブルなしで単体テストできる。
pub struct SignalFrameRecognizer<'a, R: ?Sized> {
    mem: &'a R,
    sigreturn: Option<UserAddr>,
}

impl<'a, R: ReadUserWord + ?Sized> SignalFrameRecognizer<'a, R> {
    pub fn new(mem: &'a R, sigreturn: Option<UserAddr>) -> Self {
        Self { mem, sigreturn }
    }

    /// `addr` がsigreturnトランポリンを指すか
    ///
    /// フレーム内のトランポリンコード列、または登録済みのvDSO常駐
    /// トランポリンのどちらかに一致すれば真。
    fn is_sigreturn_address(&self, addr: u64, frame_base: u64) -> bool {
        if addr == frame_base.wrapping_add(SignalFrame::TRAMP_OFFSET) {
            return true;
        }
        matches!(self.sigreturn, Some(tramp) if addr == tramp.as_u64())
    }

    /// フレーム内自己参照の構造確認
    ///
    /// `pinfo` / `puc` が同一フレーム内の埋め込み siginfo / ucontext を
    /// 正確に指していること。読み取り失敗も不一致として扱う。
    fn sane_signal_frame(&self, frame_base: u64) -> bool {
        let pinfo = self
            .mem
            .read_word(UserAddr::new(frame_base.wrapping_add(SignalFrame::PINFO_OFFSET)));
        let puc = self
            .mem
            .read_word(UserAddr::new(frame_base.wrapping_add(SignalFrame::PUC_OFFSET)));

        match (pinfo, puc) {
            (Ok(pinfo), Ok(puc)) => {
                pinfo == frame_base.wrapping_add(SignalFrame::INFO_OFFSET)
                    && puc == frame_base.wrapping_add(SignalFrame::UC_OFFSET)
            }
            _ => false,
        }
    }

    /// フレーム区間を分類する（3段ゲート）
    ///
    /// # サイズ検査の意図的なラップについて
    /// `next_sp - sp >= SIZE` はラップする符号なし減算で評価する。
    /// 代替シグナルスタックから通常スタックへ戻る遷移では `next_sp` が
    /// `sp` より数値的に小さくなり得るが、その場合もラップにより検査を
    /// 通過する。これは意図した仕様であり修正してはならない。
    pub fn classify(
        &self,
        sp: u64,
        next_sp: u64,
        next_ip: u64,
        lr: u64,
        level: u32,
    ) -> FrameClass {
        // (1) サイズ検査
        if next_sp.wrapping_sub(sp) < SignalFrame::SIZE {
            return FrameClass::Call;
        }

        // (2) トランポリンアドレス検査
        // 最外周付近（level <= 1）ではリンクレジスタ側も候補になる
        let tramp_hit = self.is_sigreturn_address(next_ip, sp)
            || (level <= 1 && self.is_sigreturn_address(lr, sp));
        if !tramp_hit {
            return FrameClass::Call;
        }

        // (3) 構造確認
        if !self.sane_signal_frame(sp) {
            return FrameClass::Call;
        }

        FrameClass::SignalBoundary
    }
}
