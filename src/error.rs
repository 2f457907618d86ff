//! 統一エラーハンドリングモジュール
//!
//! ユーザースタック読み取りが失敗する理由を列挙する。
//! ウォーカーはすべての変種を同一に扱う（サイレント終了）が、
//! テスト・診断のために原因を区別して保持する。

use core::fmt;

/// ユーザーメモリアクセスのフォールト
///
/// サンプリング対象のスタックは信頼できない生きたデータであり、
/// どの変種も「異常」ではない。リトライ・エスカレーションは行わない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// スレッドにトップレベルのアドレス空間ルートがない
    NoAddressSpace,
    /// ユーザー空間の上限を超えるアドレス
    OutOfRange,
    /// ワード境界に揃っていないアドレス
    Misaligned,
    /// 変換が存在しない（ページテーブルにエントリなし）
    NoMapping,
    /// エントリはあるが present ではない
    NotPresent,
    /// ユーザーアクセス不可（カーネル専用マッピング）
    KernelOnly,
    /// 解決先の物理フレームが通常のRAMではない
    NotRam,
    /// 高速パスの直接コピーがフォールトした
    BadCopy,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Fault::NoAddressSpace => "no address space root",
            Fault::OutOfRange => "address beyond user limit",
            Fault::Misaligned => "misaligned address",
            Fault::NoMapping => "no translation",
            Fault::NotPresent => "entry not present",
            Fault::KernelOnly => "not user accessible",
            Fault::NotRam => "frame is not ordinary ram",
            Fault::BadCopy => "direct copy faulted",
        };
        write!(f, "{}", msg)
    }
}
