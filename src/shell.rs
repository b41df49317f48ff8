//! Line-oriented front end for a session
//!
//! Commands arrive on stdin through a reader thread and pipeline events
//! arrive on the session's queue. One loop consumes both, so every timeline
//! mutation happens on this thread.

use anyhow::{bail, Context};
use crossbeam::channel::{self, select, Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::PipelineEvent;
use crate::error::PipelineError;
use crate::models::format_timer;
use crate::recordings::RecordingStore;
use crate::settings::SettingsStore;
use crate::state::{Session, SessionObserver, SessionStatus, TransportState};

const HELP: &str = "\
commands:
  record            start, pause or resume recording (resume overwrites from the cursor)
  play              start or pause playback
  stop              stop recording or playback
  drag <chunks>     scrub the cursor by a signed number of chunks
  seek <chunk>      jump the cursor to a chunk
  section           mark a section boundary at the cursor
  speed <x>         playback speed: 0.25 0.5 0.75 1 1.25 1.5 1.75 2
  wait <ms>         let the pipeline run for a while
  status            print the transport line
  save <name>       keep the take under a name and start a new one
  discard           throw the take away
  quit";

/// Levels used to draw the waveform strip
const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const STRIP_WIDTH: usize = 48;

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Record,
    Play,
    Stop,
    Drag(i64),
    Seek(usize),
    Section,
    Speed(f32),
    Wait(u64),
    Status,
    Save(String),
    Discard,
    Help,
    Quit,
}

impl FromStr for ShellCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            bail!("empty command");
        };
        let rest: Vec<&str> = parts.collect();
        let arg = || {
            rest.first()
                .copied()
                .with_context(|| format!("`{}` needs an argument", word))
        };

        let command = match word {
            "record" | "r" => ShellCommand::Record,
            "play" | "p" => ShellCommand::Play,
            "stop" | "s" => ShellCommand::Stop,
            "drag" => ShellCommand::Drag(arg()?.parse().context("drag takes a chunk count")?),
            "seek" => ShellCommand::Seek(arg()?.parse().context("seek takes a chunk index")?),
            "section" => ShellCommand::Section,
            "speed" => ShellCommand::Speed(arg()?.parse().context("speed takes a number")?),
            "wait" => ShellCommand::Wait(arg()?.parse().context("wait takes milliseconds")?),
            "status" => ShellCommand::Status,
            "save" => ShellCommand::Save(rest.join(" ")),
            "discard" => ShellCommand::Discard,
            "help" | "?" => ShellCommand::Help,
            "quit" | "q" | "exit" => ShellCommand::Quit,
            _ => bail!("unknown command `{}` (try `help`)", word),
        };
        Ok(command)
    }
}

/// What the loop does after a command
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Wait(Duration),
    Quit,
}

/// Prints transport changes and pipeline failures
pub struct ConsoleObserver {
    interval_millis: u64,
}

impl ConsoleObserver {
    pub fn new(interval_millis: u64) -> Self {
        Self { interval_millis }
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_chunk_appended(&mut self, height: f32) {
        log::trace!("chunk {:.1}", height);
    }

    fn on_pivot_changed(&mut self, pivot: usize) {
        log::trace!(
            "cursor at {} ({})",
            pivot,
            format_timer(pivot as u64 * self.interval_millis)
        );
    }

    fn on_transport_state_changed(&mut self, state: TransportState) {
        println!("[{}]", state.label());
    }

    fn on_pipeline_error(&mut self, error: &PipelineError) {
        eprintln!("pipeline error: {}", error);
    }
}

/// Render chunk heights around `pivot` as a one-line strip with a cursor
pub fn render_strip(chunks: &[f32], pivot: usize, max_height: f32, width: usize) -> String {
    if chunks.is_empty() || width == 0 {
        return String::new();
    }
    let start = pivot.saturating_sub(width / 2).min(chunks.len().saturating_sub(width));
    let end = (start + width).min(chunks.len());

    chunks[start..end]
        .iter()
        .enumerate()
        .map(|(offset, &height)| {
            if start + offset == pivot {
                return '|';
            }
            let level = if max_height > 0.0 {
                ((height / max_height) * (BARS.len() - 1) as f32).round() as usize
            } else {
                0
            };
            BARS[level.min(BARS.len() - 1)]
        })
        .collect()
}

/// One status line: state, timer, cursor, speed and section markers
pub fn status_line(status: &SessionStatus) -> String {
    let mut line = format!(
        "{:<17} {} / {}  chunk {}/{}  speed {}x",
        status.state.label(),
        format_timer(status.elapsed_millis),
        format_timer(status.total_millis),
        status.pivot,
        status.chunks,
        status.speed
    );
    if status.overwriting {
        line.push_str("  overwriting");
    }
    match (status.sections.first, status.sections.second) {
        (Some(first), Some(second)) => line.push_str(&format!("  section {}..{}", first, second)),
        (Some(first), None) => line.push_str(&format!("  section {}..", first)),
        _ => {}
    }
    line
}

fn print_status(session: &Session, max_height: f32) {
    println!("{}", status_line(&session.status()));
    let strip = render_strip(
        session.timeline().chunks(),
        session.timeline().pivot(),
        max_height,
        STRIP_WIDTH,
    );
    if !strip.is_empty() {
        println!("{}", strip);
    }
}

fn execute(
    session: &mut Session,
    store: &RecordingStore,
    settings: &mut dyn SettingsStore,
    command: ShellCommand,
    max_height: f32,
) -> anyhow::Result<Flow> {
    match command {
        ShellCommand::Record => session.record()?,
        ShellCommand::Play => session.play()?,
        ShellCommand::Stop => session.stop()?,
        ShellCommand::Drag(delta) => {
            session.begin_drag()?;
            let moved = session.drag_by(delta);
            session.end_drag()?;
            moved?;
        }
        ShellCommand::Seek(index) => {
            session.seek(index)?;
        }
        ShellCommand::Section => {
            let sections = session.select_section();
            println!("sections: {:?} {:?}", sections.first, sections.second);
        }
        ShellCommand::Speed(speed) => {
            session.set_speed(speed)?;
            settings.set_playback_speed(speed);
        }
        ShellCommand::Wait(millis) => return Ok(Flow::Wait(Duration::from_millis(millis))),
        ShellCommand::Status => print_status(session, max_height),
        ShellCommand::Save(name) => {
            let saved = session.save(store, &name)?;
            println!("saved {}", saved.display());
        }
        ShellCommand::Discard => session.discard(store)?,
        ShellCommand::Help => println!("{}", HELP),
        ShellCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Keep applying pipeline events until `duration` has passed
fn wait(session: &mut Session, events: &Receiver<PipelineEvent>, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        match events.recv_timeout(deadline - now) {
            Ok(event) => session.handle_event(event),
            Err(RecvTimeoutError::Timeout) => return,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Lines from stdin, read on their own thread
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel::unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Drive `session` from stdin until `quit` or end of input
///
/// At end of input a running playback is allowed to finish; a running
/// capture is stopped.
pub fn run(
    session: &mut Session,
    store: &RecordingStore,
    settings: &mut dyn SettingsStore,
    max_height: f32,
) -> anyhow::Result<()> {
    let lines = spawn_stdin_reader();
    let events = session.events();
    let mut input_open = true;

    print_status(session, max_height);

    loop {
        if !input_open {
            if !session.state().is_playing() {
                break;
            }
            session.wait_event(Duration::from_millis(200));
            continue;
        }

        let mut flow = Flow::Continue;
        select! {
            recv(events) -> event => {
                if let Ok(event) = event {
                    session.handle_event(event);
                }
            }
            recv(lines) -> line => match line {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() && !line.starts_with('#') {
                        match line
                            .parse::<ShellCommand>()
                            .and_then(|command| execute(session, store, settings, command, max_height))
                        {
                            Ok(next) => flow = next,
                            Err(e) => eprintln!("error: {:#}", e),
                        }
                    }
                }
                Err(_) => {
                    log::debug!("End of input");
                    input_open = false;
                }
            },
        }

        match flow {
            Flow::Continue => {}
            Flow::Wait(duration) => wait(session, &events, duration),
            Flow::Quit => break,
        }
    }

    session.shutdown();
    print_status(session, max_height);
    if session.state() != TransportState::Initialized && session.path().exists() {
        println!("take left at {}", session.path().display());
    }
    Ok(())
}
