//! I/Oマルチプレクサ
//!
//! ファイル監視・ヘルパープロセスのパイプ・端末入力・シグナル・タイマーの
//! 各イベント源はトークンを払い出されて登録され、1本のチャネルにイベントを
//! 送る。制御ループが待つのは `wait()` だけ。

pub mod sources;

pub use sources::{spawn_signal_listener, spawn_terminal_reader, spawn_ticker, watch_file};

use crossterm::event::KeyEvent;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::{SessionError, SessionResult};
use crate::logsource::SourceId;
use crate::process::JobSlot;

/// 登録ごとに払い出す識別子（再利用しない）
pub type Token = u64;

/// 一度のwaitで取り出すイベントの上限
const MAX_BATCH: usize = 1024;

/// イベント源の持ち主
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// 追跡中のログファイル
    LogFile(SourceId),
    /// ハイライトジョブの結果パイプ
    Job(JobSlot),
    /// パイプ元プロセスの標準出力
    Piper(SourceId),
    /// 制御端末
    Terminal,
    /// プロセスシグナル
    Signals,
    /// 定期tick
    Ticker,
}

/// イベントの中身
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// 行単位の出力
    Lines(Vec<String>),
    /// バイト列の出力
    Bytes(Vec<u8>),
    /// 出力の終端
    Eof,
    /// ファイルが変更された
    FileChanged,
    /// キー入力
    Key(KeyEvent),
    /// 端末サイズ変更
    Resize(u16, u16),
    /// 子プロセスが終了した（SIGCHLD）
    ChildExited,
    /// 終了要求（SIGTERM/SIGHUP）
    Terminate,
    /// 定期tick
    Tick,
    /// 読み込みエラー
    ReadError(String),
}

/// チャネルを流れるイベント
#[derive(Debug)]
pub struct IoEvent {
    pub token: Token,
    pub payload: Payload,
}

/// 準備完了イベント（持ち主解決済み）
#[derive(Debug)]
pub struct Ready {
    pub token: Token,
    pub owner: Owner,
    pub payload: Payload,
}

/// 登録済みイベント源への送信口
#[derive(Debug, Clone)]
pub struct EventSender {
    token: Token,
    tx: mpsc::UnboundedSender<IoEvent>,
}

impl EventSender {
    pub fn token(&self) -> Token {
        self.token
    }

    /// 受信側がなくなっていればfalse
    pub fn send(&self, payload: Payload) -> bool {
        self.tx
            .send(IoEvent {
                token: self.token,
                payload,
            })
            .is_ok()
    }
}

struct Registration {
    owner: Owner,
    tasks: Vec<JoinHandle<()>>,
}

/// 登録制のイベントループ
pub struct IoMultiplexer {
    tx: mpsc::UnboundedSender<IoEvent>,
    rx: mpsc::UnboundedReceiver<IoEvent>,
    registry: HashMap<Token, Registration>,
    next_token: Token,
}

impl IoMultiplexer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            registry: HashMap::new(),
            next_token: 1,
        }
    }

    /// イベント源を登録して送信口を返す
    pub fn register(&mut self, owner: Owner) -> EventSender {
        let token = self.next_token;
        self.next_token += 1;
        self.registry.insert(
            token,
            Registration {
                owner,
                tasks: Vec::new(),
            },
        );
        debug!("Registered {:?} as token {}", owner, token);
        EventSender {
            token,
            tx: self.tx.clone(),
        }
    }

    /// 登録にタスクを紐付ける（登録解除時にabortされる）
    pub fn attach(&mut self, token: Token, task: JoinHandle<()>) -> SessionResult<()> {
        match self.registry.get_mut(&token) {
            Some(registration) => {
                registration.tasks.push(task);
                Ok(())
            }
            None => {
                task.abort();
                Err(SessionError::MultiplexerFault(format!(
                    "attach to unregistered token {}",
                    token
                )))
            }
        }
    }

    /// 登録を解除し、紐付いたタスクを止める。以後このトークンのイベントは捨てられる
    pub fn deregister(&mut self, token: Token) -> Option<Owner> {
        let registration = self.registry.remove(&token)?;
        for task in &registration.tasks {
            task.abort();
        }
        debug!("Deregistered {:?} (token {})", registration.owner, token);
        Some(registration.owner)
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.registry.contains_key(&token)
    }

    /// 持ち主に紐付くトークン
    #[cfg(test)]
    pub fn tokens_of(&self, owner: Owner) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .registry
            .iter()
            .filter(|(_, r)| r.owner == owner)
            .map(|(t, _)| *t)
            .collect();
        tokens.sort_unstable();
        tokens
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// 準備完了イベントを待つ
    ///
    /// 最初の1件をブロックして待ち、残りは溜まっている分だけ取り出す。
    /// 登録解除済みトークンのイベントは黙って捨てる。払い出していない
    /// トークンのイベントはレジストリ破損として `MultiplexerFault`。
    pub async fn wait(&mut self) -> SessionResult<Vec<Ready>> {
        let first = self
            .rx
            .recv()
            .await
            .ok_or_else(|| SessionError::MultiplexerFault("event channel closed".to_string()))?;

        let mut events = vec![first];
        while events.len() < MAX_BATCH {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        let mut ready = Vec::with_capacity(events.len());
        for event in events {
            if event.token == 0 || event.token >= self.next_token {
                error!("Event for unissued token {}", event.token);
                return Err(SessionError::MultiplexerFault(format!(
                    "event for unissued token {}",
                    event.token
                )));
            }
            match self.registry.get(&event.token) {
                Some(registration) => ready.push(Ready {
                    token: event.token,
                    owner: registration.owner,
                    payload: event.payload,
                }),
                None => trace!("Dropping event for stale token {}", event.token),
            }
        }
        Ok(ready)
    }

    /// 全登録を解除
    pub fn shutdown(&mut self) {
        let tokens: Vec<Token> = self.registry.keys().copied().collect();
        for token in tokens {
            self.deregister(token);
        }
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, token: Token, payload: Payload) {
        let _ = self.tx.send(IoEvent { token, payload });
    }
}

impl Default for IoMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IoMultiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ViewKind;

    #[tokio::test]
    async fn test_events_are_routed_to_owner() {
        let mut mux = IoMultiplexer::new();
        let sender = mux.register(Owner::LogFile(SourceId(3)));
        assert!(sender.send(Payload::FileChanged));
        assert!(sender.send(Payload::Eof));

        let ready = mux.wait().await.unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].owner, Owner::LogFile(SourceId(3)));
        assert_eq!(ready[0].payload, Payload::FileChanged);
        assert_eq!(ready[1].payload, Payload::Eof);
    }

    #[tokio::test]
    async fn test_stale_token_is_dropped() {
        let mut mux = IoMultiplexer::new();
        let old = mux.register(Owner::Job(JobSlot::Search(ViewKind::Log)));
        let new = mux.register(Owner::Job(JobSlot::Search(ViewKind::Log)));
        old.send(Payload::Lines(vec!["1:stale".to_string()]));
        mux.deregister(old.token());
        new.send(Payload::Lines(vec!["2:fresh".to_string()]));

        let ready = mux.wait().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].token, new.token());
    }

    #[tokio::test]
    async fn test_unissued_token_is_fault() {
        let mut mux = IoMultiplexer::new();
        mux.inject(99, Payload::Tick);
        let err = mux.wait().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_deregister_aborts_tasks() {
        let mut mux = IoMultiplexer::new();
        let sender = mux.register(Owner::Ticker);
        let task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        let abort = task.abort_handle();
        mux.attach(sender.token(), task).unwrap();
        assert_eq!(mux.deregister(sender.token()), Some(Owner::Ticker));
        tokio::task::yield_now().await;
        assert!(abort.is_finished() || mux.is_empty());
        assert!(mux.attach(sender.token(), tokio::spawn(async {})).is_err());
    }

    #[test]
    fn test_tokens_are_never_reused() {
        let mut mux = IoMultiplexer::new();
        let a = mux.register(Owner::Terminal);
        mux.deregister(a.token());
        let b = mux.register(Owner::Terminal);
        assert!(b.token() > a.token());
        assert_eq!(mux.tokens_of(Owner::Terminal), vec![b.token()]);
    }
}
