use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use edgechat_core::{BenchmarkResult, ChatMessage, ChatSide, ConversationState, LoadingKind};
use uuid::Uuid;

/// Incrementally prints a conversation as it changes: streamed text as
/// deltas, everything else once.
#[derive(Default)]
pub struct Printer {
    printed: HashMap<Uuid, usize>,
    seen: HashSet<Uuid>,
}

impl Printer {
    pub fn render(&mut self, state: &ConversationState, out: &mut impl Write) -> io::Result<()> {
        for message in state.messages() {
            match message {
                ChatMessage::Text(text) if text.side == ChatSide::Agent => {
                    let done = self.printed.entry(text.id).or_insert(0);
                    if text.content.len() > *done {
                        write!(out, "{}", &text.content[*done..])?;
                        *done = text.content.len();
                    }
                    if text.latency_ms.is_some() && self.seen.insert(text.id) {
                        writeln!(out)?;
                    }
                }
                ChatMessage::Text(_) => {}
                ChatMessage::Loading(loading) => {
                    if loading.kind == LoadingKind::Search && self.seen.insert(loading.id) {
                        writeln!(out, "(searching the web...)")?;
                    }
                }
                ChatMessage::Warning(warning) => {
                    if self.seen.insert(warning.id) {
                        writeln!(out, "! {}", warning.content)?;
                    }
                }
                ChatMessage::Benchmark(result) => {
                    if self.seen.insert(result.id) {
                        writeln!(out, "  [{}]", stats_line(result))?;
                    }
                }
            }
        }
        out.flush()
    }
}

fn stats_line(result: &BenchmarkResult) -> String {
    result
        .ordered_stats
        .iter()
        .filter_map(|stat| {
            let value = result.value(&stat.id)?;
            Some(format!("{}: {:.2} {}", stat.label, value, stat.unit))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}
