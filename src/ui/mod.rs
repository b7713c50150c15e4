//! 终端层：行式 REPL（repl）、进度与结果渲染（render）

pub mod render;
pub mod repl;

pub use render::{render_event, render_result, result_view};
pub use repl::{run_repl, stdin_lines, ConsoleConfirmation, SharedInput};
