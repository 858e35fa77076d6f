//! Terminal channel: interactive loop and one-shot mode.
//!
//! Both variants stream assistant text to stdout as it arrives.  The
//! interactive loop persists its history under the `cli` session key;
//! one-shot mode uses an ephemeral session that never touches disk.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cclaw::agent_loop::{self, AgentContext};
use crate::cclaw::session::Session;

/// Run one turn with live output, then make sure the reply ends up on
/// stdout even when streaming produced nothing (synthetic error replies
/// bypass the delta path).
async fn run_streaming_turn(ctx: &AgentContext, session: &mut Session, line: &str) {
    let mut streamed_any = false;
    let mut sink = |delta: &str| {
        streamed_any = true;
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    };
    let reply = agent_loop::run(ctx, session, line, Some(&mut sink)).await;
    if !streamed_any && !reply.is_empty() {
        print!("{}", reply);
    }
    println!();
}

/// One-shot mode: answer a single prompt and exit.
pub async fn one_shot(ctx: &AgentContext, prompt: &str) {
    let mut session = Session::ephemeral("cli");
    run_streaming_turn(ctx, &mut session, prompt).await;
}

/// Interactive terminal loop.
///
/// Empty lines are skipped; `/quit` and `/exit` end the loop, as does EOF
/// or the process-wide running flag clearing.
pub async fn interactive(ctx: &AgentContext) {
    let mut session = Session::open(&ctx.config.workspace, "cli");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    println!("cclaw — {} ({}). /quit to exit.", ctx.config.model, ctx.provider.name());

    while ctx.is_running() {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        run_streaming_turn(ctx, &mut session, line).await;
    }
    session.close();
}
