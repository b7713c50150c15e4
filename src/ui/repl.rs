//! 行式交互循环：读问题 → 运行流水线 → 打印进度与结果
//!
//! 运行中按 Ctrl+C 取消当前问题并回到提示符；提示符处按 Ctrl+C、输入 exit/quit 或 EOF 退出。

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::{Pipeline, PipelineError, SaveConfirmation};
use crate::database::ExecutionResult;
use crate::ui::render::{render_event, render_result};

/// REPL 与保存确认共用的 stdin 行读取器
pub type SharedInput = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn stdin_lines() -> SharedInput {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn is_exit(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "exit" | "quit")
}

/// 在终端询问是否把成功的查询写入记忆
pub struct ConsoleConfirmation {
    input: SharedInput,
}

impl ConsoleConfirmation {
    pub fn new(input: SharedInput) -> Self {
        Self { input }
    }
}

#[async_trait]
impl SaveConfirmation for ConsoleConfirmation {
    async fn confirm_save(&self, _question: &str, sql: &str, result: &ExecutionResult) -> bool {
        println!("\nSQL:\n{}\n({} rows)", sql, result.row_count);
        prompt("Save this query to memory? [y/N] ");
        match self.input.lock().await.next_line().await {
            Ok(Some(answer)) => is_yes(&answer),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("cannot read confirmation: {}", e);
                false
            }
        }
    }
}

/// 主循环；stdin 读取失败时返回错误
pub async fn run_repl(pipeline: &Pipeline, input: SharedInput) -> std::io::Result<()> {
    println!("Tables: {}", pipeline.schema().table_names().join(", "));

    loop {
        prompt("\nAsk a question (or exit): ");
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = async { input.lock().await.next_line().await } => line?,
        };
        let Some(line) = line else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit(question) {
            break;
        }

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = pipeline.run(question, &cancel, Some(&tx));
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                res = &mut run => break res,
                Some(ev) = rx.recv() => println!("{}", render_event(&ev)),
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    tracing::info!("cancel requested");
                    cancel.cancel();
                }
            }
        };
        while let Ok(ev) = rx.try_recv() {
            println!("{}", render_event(&ev));
        }

        match outcome {
            Ok(result) => {
                tracing::debug!(attempts = result.attempts.len(), "pipeline finished");
                println!("{}", render_result(&result));
            }
            Err(PipelineError::Cancelled) => println!("cancelled"),
            Err(e) => {
                tracing::error!("pipeline error: {}", e);
                println!("error: {}", e);
            }
        }
    }

    println!("bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answers() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES \n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(!is_exit("exit now"));
    }
}
