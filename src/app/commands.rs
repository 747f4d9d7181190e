use std::path::PathBuf;

use crate::error::{SessionError, SessionResult};
use crate::logsource::Level;

/// `goto` の移動先
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GotoTarget {
    /// 行番号（0始まり）
    Line(usize),
    /// 全体に対する割合
    Percent(f64),
}

/// コマンドラインで入力されたコマンド
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// ファイルを開く
    Open(PathBuf),
    /// シェルコマンドの出力をログソースにする
    Pipe(String),
    /// マッチする行だけ表示
    FilterIn(String),
    /// マッチする行を隠す
    FilterOut(String),
    /// 最低ログレベル
    SetMinLevel(Level),
    /// フィルタを有効化（0始まりに変換済み）
    EnableFilter(usize),
    /// フィルタを無効化
    DisableFilter(usize),
    /// フィルタを削除
    DeleteFilter(usize),
    /// フィルタを全削除
    ClearFilters,
    /// 全ファイルを再インデックス
    Rebuild,
    /// 指定位置へ移動
    Goto(GotoTarget),
    /// ヒストグラムを細かく
    ZoomIn,
    /// ヒストグラムを粗く
    ZoomOut,
    /// セッションを保存
    SaveSession,
    /// 終了
    Quit,
    /// 組み込み以外（外部のコマンド実行系へ渡す）
    External(String),
}

fn usage(text: &str) -> SessionError {
    SessionError::CommandFailed(format!("usage: {}", text))
}

/// 1始まりのフィルタ番号を0始まりに
fn filter_index(name: &str, arg: &str) -> SessionResult<usize> {
    arg.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| usage(&format!("{} N (N starts at 1)", name)))
}

/// コマンド文字列を解釈
pub fn parse(text: &str) -> SessionResult<Command> {
    let text = text.trim();
    let (name, arg) = match text.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (text, ""),
    };

    let require = |expected: &str| {
        if arg.is_empty() {
            Err(usage(expected))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match name {
        "open" => Command::Open(PathBuf::from(require("open <path>")?)),
        "pipe" => Command::Pipe(require("pipe <shell command>")?),
        "filter-in" => Command::FilterIn(require("filter-in <regex>")?),
        "filter-out" => Command::FilterOut(require("filter-out <regex>")?),
        "set-min-log-level" => {
            let level = require("set-min-log-level <level>")?;
            Command::SetMinLevel(Level::from_name(&level).ok_or_else(|| {
                SessionError::CommandFailed(format!("unknown log level: {}", level))
            })?)
        }
        "enable-filter" => Command::EnableFilter(filter_index(name, arg)?),
        "disable-filter" => Command::DisableFilter(filter_index(name, arg)?),
        "delete-filter" => Command::DeleteFilter(filter_index(name, arg)?),
        "clear-filters" => Command::ClearFilters,
        "rebuild" => Command::Rebuild,
        "goto" => {
            let target = require("goto <line>|<percent>%")?;
            let parsed = match target.strip_suffix('%') {
                Some(percent) => percent
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|p| (0.0..=100.0).contains(p))
                    .map(GotoTarget::Percent),
                None => target.parse::<usize>().ok().map(GotoTarget::Line),
            };
            Command::Goto(parsed.ok_or_else(|| usage("goto <line>|<percent>%"))?)
        }
        "zoom-in" => Command::ZoomIn,
        "zoom-out" => Command::ZoomOut,
        "save-session" => Command::SaveSession,
        "q" | "quit" => Command::Quit,
        "" => return Err(SessionError::CommandFailed("empty command".to_string())),
        _ => Command::External(text.to_string()),
    };
    Ok(command)
}

/// 組み込み以外のコマンドを実行する外部の協力者
pub trait CommandExecutor: Send {
    /// 成功時は状態行に出すメッセージを返す
    fn execute_command(&mut self, text: &str) -> SessionResult<String>;
}

/// 外部コマンドを持たない実行系
#[derive(Debug, Default)]
pub struct NoExternalCommands;

impl CommandExecutor for NoExternalCommands {
    fn execute_command(&mut self, text: &str) -> SessionResult<String> {
        let name = text.split_whitespace().next().unwrap_or(text);
        Err(SessionError::UnknownCommand(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtins() {
        assert_eq!(parse("open /var/log/syslog").unwrap(), Command::Open("/var/log/syslog".into()));
        assert_eq!(parse("pipe make 2>&1").unwrap(), Command::Pipe("make 2>&1".into()));
        assert_eq!(parse("filter-out GET /health").unwrap(), Command::FilterOut("GET /health".into()));
        assert_eq!(parse("set-min-log-level WARN").unwrap(), Command::SetMinLevel(Level::Warning));
        assert_eq!(parse("disable-filter 2").unwrap(), Command::DisableFilter(1));
        assert_eq!(parse("goto 10").unwrap(), Command::Goto(GotoTarget::Line(10)));
        assert_eq!(parse("goto 50%").unwrap(), Command::Goto(GotoTarget::Percent(50.0)));
        assert_eq!(parse(" quit ").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("open"), Err(SessionError::CommandFailed(_))));
        assert!(matches!(parse("set-min-log-level loud"), Err(SessionError::CommandFailed(_))));
        assert!(parse("enable-filter 0").is_err());
        assert!(parse("goto 150%").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_unknown_goes_external() {
        assert_eq!(parse("write-to out.txt").unwrap(), Command::External("write-to out.txt".into()));
        let err = NoExternalCommands.execute_command("write-to out.txt").unwrap_err();
        assert_eq!(err.to_string(), "unknown command: write-to");
    }
}
