// ============================================================================
// src/callchain.rs - コールチェーンウォーカー
// ============================================================================
//! PMU割り込みを取ったプロセッサ上で、中断されたスレッドのユーザー
//! スタックをフレーム単位で辿り、リターンアドレス列を復元する。
//!
//! ウォークは中断なしの単一パスで、各ステップは即座に成功するか
//! 即座に失敗する。失敗はすべて終了条件であってエラーではない:
//! 生きたスレッドのスタックはベストエフォートのスナップショットで
//! あり、途中までのチェーンも正当な出力である。

use alloc::vec::Vec;

use crate::addr::{UserAddr, WORD_SIZE, invalid_user_sp};
use crate::sigframe::{FrameClass, REG_LNK, REG_NIP, REG_SP, SignalFrame, SignalFrameRecognizer};
use crate::uaccess::ReadUserWord;

/// コンテキスト切り替えマーカー
///
/// 命令アドレス列に混ぜて格納される番兵値。実在のユーザーアドレスと
/// 衝突しないよう、アドレス空間最上部の値を使う。
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMarker {
    /// カーネルモード実行（本コアは格納しない）
    Kernel = (-128i64) as u64,
    /// シグナル境界を越えてユーザー実行へ復帰
    User = (-512i64) as u64,
}

impl ContextMarker {
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self as u64
    }
}

/// コールチェーンエントリ列
///
/// 1回のサンプリングで生成される追記専用のアドレス列。
/// 上限 `max_stack` を超える格納は黙って捨てられる。
#[derive(Debug)]
pub struct CallchainEntries {
    max_stack: usize,
    ips: Vec<u64>,
}

impl CallchainEntries {
    pub fn new(max_stack: usize) -> Self {
        Self {
            max_stack,
            ips: Vec::with_capacity(max_stack),
        }
    }

    /// 命令アドレスを追記する（満杯なら無視）
    #[inline]
    pub fn store(&mut self, ip: u64) {
        if self.ips.len() < self.max_stack {
            self.ips.push(ip);
        }
    }

    /// コンテキストマーカーを追記する
    #[inline]
    pub fn store_context(&mut self, marker: ContextMarker) {
        self.store(marker.as_u64());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ips.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ips.len() >= self.max_stack
    }

    #[inline]
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.ips
    }

    /// 次のサンプルに向けて再利用する
    pub fn reset(&mut self, max_stack: usize) {
        self.max_stack = max_stack;
        self.ips.clear();
    }
}

/// 中断時点のレジスタスナップショット
///
/// 割り込みエントリ機構が供給する。gpr[1] がスタックポインタ。
#[derive(Debug, Clone)]
pub struct UserRegs {
    pub gpr: [u64; 32],
    /// 次に実行される命令のアドレス
    pub nip: u64,
    /// リンクレジスタ
    pub link: u64,
}

impl UserRegs {
    pub const fn new() -> Self {
        Self {
            gpr: [0; 32],
            nip: 0,
            link: 0,
        }
    }

    /// スタックポインタ
    #[inline]
    pub fn sp(&self) -> u64 {
        self.gpr[1]
    }
}

impl Default for UserRegs {
    fn default() -> Self {
        Self::new()
    }
}

/// ウォーカーの遷移状態（1回のウォークの間だけ生きる）
struct StackCursor {
    /// 現在のスタックポインタ
    sp: u64,
    /// 現在の命令ポインタ候補
    next_ip: u64,
    /// リンクレジスタ値
    lr: u64,
    /// 直近のリセット以降に辿ったフレーム数
    ///
    /// 最外周フレーム (level 0) のリターンアドレスはスタック上ではなく
    /// リンクレジスタにある。シグナル遷移で 0 に戻る。
    level: u32,
}

/// ユーザースタックのコールチェーンを復元する
///
/// `entries` の上限に達するか、いずれかの読み取り・妥当性検査が
/// 失敗するまでフレームを辿る。失敗は黙ってウォークを打ち切り、
/// それまでに積んだエントリはそのまま有効な出力となる。
///
/// `sigreturn` は登録済み vDSO sigreturn トランポリンの解決済み
/// アドレス（`vdso::sigreturn_address` で得る）。
pub fn callchain_user<R: ReadUserWord + ?Sized>(
    entries: &mut CallchainEntries,
    regs: &UserRegs,
    mem: &R,
    sigreturn: Option<UserAddr>,
) {
    let recognizer = SignalFrameRecognizer::new(mem, sigreturn);
    let mut cur = StackCursor {
        sp: regs.sp(),
        next_ip: regs.nip,
        lr: regs.link,
        level: 0,
    };

    entries.store(cur.next_ip);

    while !entries.is_full() {
        if invalid_user_sp(cur.sp) {
            return;
        }

        // フレームのバックチェーン（次フレームのsp）
        let next_sp = match mem.read_word(UserAddr::new(cur.sp)) {
            Ok(word) => word,
            Err(_) => return,
        };

        // 深いフレームのリターンアドレスは sp の2ワード先に保存される
        if cur.level > 0 {
            cur.next_ip = match mem.read_word(UserAddr::new(cur.sp.wrapping_add(2 * WORD_SIZE))) {
                Ok(word) => word,
                Err(_) => return,
            };
        }

        match recognizer.classify(cur.sp, next_sp, cur.next_ip, cur.lr, cur.level) {
            FrameClass::SignalBoundary => {
                // 現在のspをシグナルフレームの基点として再解釈し、
                // 埋め込みレジスタ保存領域から中断前の文脈を取り出す
                let saved_nip = mem.read_word(SignalFrame::saved_reg_addr(cur.sp, REG_NIP));
                let saved_lnk = mem.read_word(SignalFrame::saved_reg_addr(cur.sp, REG_LNK));
                let saved_sp = mem.read_word(SignalFrame::saved_reg_addr(cur.sp, REG_SP));

                let (nip, lnk, sp) = match (saved_nip, saved_lnk, saved_sp) {
                    (Ok(nip), Ok(lnk), Ok(sp)) => (nip, lnk, sp),
                    _ => return,
                };

                cur.next_ip = nip;
                cur.lr = lnk;
                cur.sp = sp;
                cur.level = 0;

                entries.store_context(ContextMarker::User);
                entries.store(cur.next_ip);
            }
            FrameClass::Call => {
                // 最外周フレームのリターンアドレスはリンクレジスタ由来
                if cur.level == 0 {
                    cur.next_ip = cur.lr;
                }
                entries.store(cur.next_ip);
                cur.level += 1;
                cur.sp = next_sp;
            }
        }
    }
}
