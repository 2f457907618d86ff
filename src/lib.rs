// src/lib.rs
//! PMUサンプリング用ユーザーコールチェーン復元 (ExoRust)
//!
//! パフォーマンス監視割り込みが発火した瞬間の、中断されたスレッドの
//! ユーザー空間呼び出し連鎖（リターンアドレス列）を、対象プロセスの
//! 協力なしに・割り込みコンテキストでページフォールトを起こさずに
//! 復元する。
//!
//! 対象ユーザーABIは64ビットのバックチェーン/リンクレジスタ規約:
//! 各フレームは sp+0 にバックチェーンワードを持ち、2番目以降の
//! フレームは sp+16 に保存リターンアドレスを持つ。最新フレームの
//! リターンアドレスはリンクレジスタにある。
//!
//! ## アーキテクチャ
//! ```text
//! +--------------------+
//! |  callchain         |  <- 駆動ループ（2状態: 通常 / シグナル遷移）
//! +--------------------+
//!     |           |
//!     v           v
//! +----------+ +-----------+
//! | sigframe | |  uaccess  |  <- 3段ゲート認識器 / 安全なワード読み取り
//! +----------+ +-----------+
//!                  |
//!                  v (低速パス)
//!            +-----------+
//!            |  pgtable  |  <- 注入されるアドレス変換ケーパビリティ
//!            +-----------+
//! ```
//!
//! ## 安全性に関する注記
//! - ユーザー制御のアドレスは [`addr::UserAddr`] として持ち回り、
//!   デリファレンスは必ず [`uaccess`] のリーダーを経由する
//! - 低速パスの割り込み禁止ウィンドウは [`irq::IrqGuard`] により
//!   全脱出パスで閉じられる
//! - ウォークのあらゆる失敗は終了条件であり、途中までのチェーンが
//!   そのまま正当な出力になる（リトライ・エスカレーションなし）

#![no_std]

extern crate alloc;

// ============================================================================
// サブモジュール
// ============================================================================

// ユーザーアドレス空間の定数と Newtype
pub mod addr;

// 統一エラー型
pub mod error;

// ローカル割り込み禁止ガード
pub mod irq;

// ページテーブルエントリモデルと変換ケーパビリティ
pub mod pgtable;

// 安全なユーザーメモリリーダー（高速/低速パス）
pub mod uaccess;

// シグナルフレーム記述子と認識器
pub mod sigframe;

// sigreturn トランポリンレジストリ
pub mod vdso;

// コールチェーンウォーカー
pub mod callchain;

// ============================================================================
// Re-exports
// ============================================================================

pub use addr::{PAGE_SHIFT, PAGE_SIZE, STACK_TOP, TASK_SIZE, Pfn, UserAddr, invalid_user_sp};
pub use callchain::{CallchainEntries, ContextMarker, UserRegs, callchain_user};
pub use error::Fault;
pub use pgtable::{Mapping, PageEntry, PageTables, PteFlags};
pub use sigframe::{FrameClass, SignalFrame, SignalFrameRecognizer};
pub use uaccess::{NoFaultCopy, ReadUserWord, UserStackReader};
pub use vdso::{ProcessId, register_sigtramp_offset, set_process_vdso_base, sigreturn_address};
