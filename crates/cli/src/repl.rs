use std::sync::Arc;

use cogito_core::affect::AffectHandle;
use cogito_core::io::input::{self, EventSender};
use cogito_core::io::output::DecisionReceiver;
use cogito_core::runtime::Dispatcher;
use cogito_core::types::{DecisionRecord, DispatcherStatus, Event};
use rustyline::error::ReadlineError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

const HELP: &str = "\
commands:
  <text>             send a user message
  /alert <payload>   hardware alert (JSON or plain text)
  /update <payload>  system update (JSON or plain text)
  /timer <label>     timer event
  /event <json>      raw event {\"kind\", \"payload\", \"arrival_time\"?}
  /status            dispatcher status
  /mood              affective state
  /recent [n]        recently completed tasks
  /workers           per-worker answered and absent counts
  /quit              exit";

/// Everything the REPL needs from the running pipeline.
pub struct Session {
    pub event_tx: EventSender,
    pub decision_rx: DecisionReceiver,
    pub status_rx: watch::Receiver<DispatcherStatus>,
    pub affect: AffectHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub token: CancellationToken,
    pub notices: Vec<String>,
}

/// Parsed REPL line.
#[derive(Debug, PartialEq)]
enum Command {
    Send(Event),
    Raw(serde_json::Value),
    Status,
    Mood,
    Recent(usize),
    Workers,
    Help,
    Quit,
    Invalid(String),
}

fn payload_of(rest: &str) -> serde_json::Value {
    serde_json::from_str(rest).unwrap_or_else(|_| serde_json::json!({ "message": rest }))
}

fn parse(line: &str) -> Option<Command> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }
    if !text.starts_with('/') {
        return Some(Command::Send(Event::user_message(text)));
    }
    let (cmd, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let rest = rest.trim();
    let command = match cmd {
        "/q" | "/quit" | "/exit" => Command::Quit,
        "/help" | "/?" => Command::Help,
        "/status" => Command::Status,
        "/mood" => Command::Mood,
        "/workers" => Command::Workers,
        "/alert" => Command::Send(Event::hardware_alert(payload_of(rest))),
        "/update" => Command::Send(Event::system_update(payload_of(rest))),
        "/timer" => Command::Send(Event::timer(if rest.is_empty() { "tick" } else { rest })),
        "/event" => match serde_json::from_str(rest) {
            Ok(raw) => Command::Raw(raw),
            Err(e) => Command::Invalid(format!("not JSON: {e}")),
        },
        "/recent" => match rest {
            "" => Command::Recent(5),
            n => match n.parse() {
                Ok(n) => Command::Recent(n),
                Err(_) => Command::Invalid(format!("not a count: {n}")),
            },
        },
        other => Command::Invalid(format!("unknown command {other}, try /help")),
    };
    Some(command)
}

fn print_record(record: &DecisionRecord) {
    match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("cannot render decision {}: {e}", record.task_id),
    }
}

pub async fn run(mut session: Session) -> anyhow::Result<()> {
    for notice in &session.notices {
        println!("{notice}");
    }
    println!("cogito ready, /help for commands");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);
    request_next_prompt(&ready_tx);

    loop {
        tokio::select! {
            _ = session.token.cancelled() => break,
            record = session.decision_rx.recv() => {
                let Some(record) = record else {
                    break;
                };
                print_record(&record);
            }
            line = line_rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                let line = match line {
                    InputEvent::Line(line) => line,
                    InputEvent::Interrupted => {
                        session.token.cancel();
                        break;
                    }
                    InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                };
                match parse(&line) {
                    None => {}
                    Some(Command::Quit) => break,
                    Some(Command::Help) => println!("{HELP}"),
                    Some(Command::Send(event)) => {
                        if session.event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::Raw(raw)) => {
                        if let Err(e) = input::submit_raw(&session.event_tx, &raw).await {
                            eprintln!("rejected: {e}");
                        }
                    }
                    Some(Command::Status) => {
                        let status = *session.status_rx.borrow();
                        println!("{}", serde_json::to_string(&status)?);
                    }
                    Some(Command::Mood) => {
                        println!("{}", serde_json::to_string(&session.affect.reading())?);
                    }
                    Some(Command::Recent(n)) => {
                        for task in session.dispatcher.completed(n).await {
                            println!(
                                "{} {} {} {:.2} {}",
                                task.completed_at.format("%H:%M:%S"),
                                task.event_kind,
                                task.decision.outcome.as_str(),
                                task.decision.confidence_score,
                                task.decision.final_decision,
                            );
                        }
                    }
                    Some(Command::Workers) => {
                        for worker in session.dispatcher.worker_status() {
                            println!("{}", serde_json::to_string(&worker)?);
                        }
                    }
                    Some(Command::Invalid(msg)) => eprintln!("{msg}"),
                }
                request_next_prompt(&ready_tx);
            }
        }
    }
    drop(ready_tx);
    println!();
    Ok(())
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<()>) {
    let _ = ready_tx.send(());
}

/// Blocking line editor on its own thread; reads one line per prompt request.
fn spawn_input_thread(
    line_tx: mpsc::UnboundedSender<InputEvent>,
    ready_rx: std::sync::mpsc::Receiver<()>,
) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            match editor.readline("cogito> ") {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}

pub fn spawn_sigint_canceler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogito_core::types::EventKind;

    fn sent_kind(line: &str) -> EventKind {
        match parse(line) {
            Some(Command::Send(event)) => event.kind,
            other => panic!("expected an event for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_user_message() {
        assert_eq!(sent_kind("hello there"), EventKind::UserMessage);
        assert!(parse("   ").is_none());
    }

    #[test]
    fn event_commands() {
        assert_eq!(sent_kind("/alert {\"sensor\":\"cpu\"}"), EventKind::HardwareAlert);
        assert_eq!(sent_kind("/update kernel 6.18"), EventKind::SystemUpdate);
        assert_eq!(sent_kind("/timer"), EventKind::Timer);
    }

    #[test]
    fn plain_text_payload_is_wrapped() {
        assert_eq!(payload_of("fan stalled"), serde_json::json!({"message": "fan stalled"}));
        assert_eq!(payload_of("{\"rpm\":0}"), serde_json::json!({"rpm": 0}));
    }

    #[test]
    fn control_commands() {
        assert_eq!(parse("/quit"), Some(Command::Quit));
        assert_eq!(parse("/status"), Some(Command::Status));
        assert_eq!(parse("/recent 3"), Some(Command::Recent(3)));
        assert_eq!(parse("/workers"), Some(Command::Workers));
        assert!(matches!(parse("/recent many"), Some(Command::Invalid(_))));
        assert!(matches!(parse("/dance"), Some(Command::Invalid(_))));
        assert!(matches!(parse("/event {bad"), Some(Command::Invalid(_))));
    }
}
