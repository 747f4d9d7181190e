//! 常駐イベント源（端末・シグナル・tick・ファイル監視）

use crossterm::event::{self, Event, KeyEventKind};
use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EventSender, Payload};

/// 端末入力を読むスレッドを起動
///
/// `crossterm::event::read()` はブロッキングなので専用スレッドで回す。
/// 受信側がなくなったら次のイベントで終了する。
pub fn spawn_terminal_reader(sender: EventSender) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("terminal-reader".to_string())
        .spawn(move || loop {
            let payload = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => Payload::Key(key),
                Ok(Event::Resize(w, h)) => Payload::Resize(w, h),
                Ok(_) => continue,
                Err(e) => {
                    sender.send(Payload::ReadError(e.to_string()));
                    break;
                }
            };
            if !sender.send(payload) {
                break;
            }
        })?;
    Ok(())
}

/// SIGCHLD / SIGTERM / SIGHUP を監視するタスクを起動
pub fn spawn_signal_listener(sender: EventSender) -> std::io::Result<JoinHandle<()>> {
    let mut child = signal(SignalKind::child())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                Some(()) = child.recv() => Payload::ChildExited,
                Some(()) = terminate.recv() => Payload::Terminate,
                Some(()) = hangup.recv() => Payload::Terminate,
                else => break,
            };
            if !sender.send(payload) {
                break;
            }
        }
    }))
}

/// 定期tickのタスクを起動
pub fn spawn_ticker(sender: EventSender, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 最初のtickは即時なので読み捨てる
        interval.tick().await;
        loop {
            interval.tick().await;
            if !sender.send(Payload::Tick) {
                break;
            }
        }
    })
}

/// ファイルの変更監視を開始（watcherをdropすると停止）
pub fn watch_file(path: &Path, sender: EventSender) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    sender.send(Payload::FileChanged);
                }
            }
            Err(e) => warn!("File watcher error: {:?}", e),
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    debug!("Watching {}", path.display());
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::{IoMultiplexer, Owner};

    #[tokio::test]
    async fn test_ticker_delivers_ticks() {
        let mut mux = IoMultiplexer::new();
        let sender = mux.register(Owner::Ticker);
        let token = sender.token();
        let task = spawn_ticker(sender, Duration::from_millis(5));
        mux.attach(token, task).unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(5), mux.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(ready.iter().all(|r| r.payload == Payload::Tick));
    }
}
