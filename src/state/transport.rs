//! Transport state machine for recording and playback
//!
//! Pure and UI-agnostic: a command either yields the next state or a
//! `StateError`, and the machine never changes state on an illegal command.
//! Side effects (pipelines, files, redraws) are applied by the session.

use crate::error::StateError;

/// How a recording pass writes into the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Grow the timeline at its end
    Append,
    /// Replace existing chunks forward from the pivot
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Initialized,
    Recording(RecordMode),
    PauseRecording,
    StopRecording,
    Playing,
    PausePlaying,
    StopPlaying,
    DragWhilePlaying,
}

impl TransportState {
    pub fn is_recording(&self) -> bool {
        matches!(self, TransportState::Recording(_))
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }

    /// States in which a pipeline is running
    pub fn is_active(&self) -> bool {
        self.is_recording() || self.is_playing()
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransportState::Initialized => "initialized",
            TransportState::Recording(RecordMode::Append) => "recording",
            TransportState::Recording(RecordMode::Overwrite) => "overwriting",
            TransportState::PauseRecording => "recording paused",
            TransportState::StopRecording => "recording stopped",
            TransportState::Playing => "playing",
            TransportState::PausePlaying => "playback paused",
            TransportState::StopPlaying => "playback stopped",
            TransportState::DragWhilePlaying => "dragging",
        }
    }
}

/// User commands and pipeline completion events driving the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Record,
    Play,
    Stop,
    DragStart,
    DragEnd { at_end: bool },
    PlaybackFinished,
    PipelineFailed,
    Reset,
}

/// Which screen owns the machine; the player never records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Recorder,
    Player,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TransportState,
    pub to: TransportState,
}

/// Next state for `command`, or `None` when the command is illegal
pub fn next_state(
    activity: Activity,
    state: TransportState,
    command: Command,
) -> Option<TransportState> {
    use TransportState::*;

    match (command, state) {
        (Command::Record, _) if activity == Activity::Player => None,
        (Command::Record, Initialized | StopRecording) => Some(Recording(RecordMode::Append)),
        (Command::Record, Recording(_)) => Some(PauseRecording),
        (Command::Record, PauseRecording | PausePlaying | StopPlaying) => {
            Some(Recording(RecordMode::Overwrite))
        }
        (Command::Record, _) => None,

        (Command::Play, Initialized | PausePlaying | StopPlaying | StopRecording | PauseRecording) => {
            Some(Playing)
        }
        (Command::Play, Playing) => Some(PausePlaying),
        (Command::Play, _) => None,

        (Command::Stop, Playing | PausePlaying | DragWhilePlaying) => Some(StopPlaying),
        (Command::Stop, Recording(_) | PauseRecording | StopPlaying | StopRecording)
            if activity == Activity::Recorder =>
        {
            Some(StopRecording)
        }
        (Command::Stop, _) => None,

        (Command::DragStart, Playing) => Some(DragWhilePlaying),
        (Command::DragStart, _) => None,

        (Command::DragEnd { at_end: true }, DragWhilePlaying) => Some(StopPlaying),
        (Command::DragEnd { at_end: false }, DragWhilePlaying) => Some(Playing),
        (Command::DragEnd { .. }, _) => None,

        (Command::PlaybackFinished, Playing) => Some(StopPlaying),
        (Command::PlaybackFinished, _) => None,

        (Command::PipelineFailed, Recording(_)) => Some(StopRecording),
        (Command::PipelineFailed, Playing) => Some(StopPlaying),
        (Command::PipelineFailed, _) => None,

        (
            Command::Reset,
            Initialized | PauseRecording | StopRecording | PausePlaying | StopPlaying,
        ) => Some(Initialized),
        (Command::Reset, _) => None,
    }
}

/// The single live transport state of a session
#[derive(Debug, Clone)]
pub struct Transport {
    activity: Activity,
    state: TransportState,
}

impl Transport {
    pub fn new(activity: Activity) -> Self {
        Self {
            activity,
            state: TransportState::Initialized,
        }
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Apply `command`, leaving the state untouched when it is illegal
    pub fn apply(&mut self, command: Command) -> Result<Transition, StateError> {
        let from = self.state;
        match next_state(self.activity, from, command) {
            Some(to) => {
                self.state = to;
                log::info!("Transport {:?} -> {:?} ({:?})", from, to, command);
                Ok(Transition { from, to })
            }
            None => {
                log::warn!("Rejected {:?} while {:?}", command, from);
                Err(StateError {
                    state: from,
                    command,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransportState::*;

    #[test]
    fn test_record_toggle_cycle() {
        let mut transport = Transport::new(Activity::Recorder);
        let t = transport.apply(Command::Record).unwrap();
        assert_eq!(t.from, Initialized);
        assert_eq!(t.to, Recording(RecordMode::Append));

        transport.apply(Command::Record).unwrap();
        assert_eq!(transport.state(), PauseRecording);

        transport.apply(Command::Record).unwrap();
        assert_eq!(transport.state(), Recording(RecordMode::Overwrite));
    }

    #[test]
    fn test_record_while_playing_is_rejected() {
        let mut transport = Transport::new(Activity::Recorder);
        transport.apply(Command::Play).unwrap();
        let err = transport.apply(Command::Record).unwrap_err();
        assert_eq!(err.state, Playing);
        assert_eq!(err.command, Command::Record);
        assert_eq!(transport.state(), Playing);
    }

    #[test]
    fn test_play_while_recording_is_rejected() {
        let mut transport = Transport::new(Activity::Recorder);
        transport.apply(Command::Record).unwrap();
        assert!(transport.apply(Command::Play).is_err());
        assert!(transport.apply(Command::DragStart).is_err());
        assert_eq!(transport.state(), Recording(RecordMode::Append));
    }

    #[test]
    fn test_stop_recording_sources() {
        for state in [
            Recording(RecordMode::Append),
            Recording(RecordMode::Overwrite),
            PauseRecording,
            StopPlaying,
            StopRecording,
        ] {
            assert_eq!(
                next_state(Activity::Recorder, state, Command::Stop),
                Some(StopRecording),
                "{:?}",
                state
            );
        }
        assert_eq!(next_state(Activity::Recorder, Initialized, Command::Stop), None);
    }

    #[test]
    fn test_play_sources() {
        for state in [Initialized, PausePlaying, StopPlaying, StopRecording, PauseRecording] {
            assert_eq!(
                next_state(Activity::Recorder, state, Command::Play),
                Some(Playing)
            );
        }
        assert_eq!(
            next_state(Activity::Recorder, Playing, Command::Play),
            Some(PausePlaying)
        );
    }

    #[test]
    fn test_resume_from_playback_overwrites() {
        assert_eq!(
            next_state(Activity::Recorder, PausePlaying, Command::Record),
            Some(Recording(RecordMode::Overwrite))
        );
        assert_eq!(
            next_state(Activity::Recorder, StopRecording, Command::Record),
            Some(Recording(RecordMode::Append))
        );
    }

    #[test]
    fn test_drag_cycle() {
        let mut transport = Transport::new(Activity::Player);
        transport.apply(Command::Play).unwrap();
        transport.apply(Command::DragStart).unwrap();
        assert_eq!(transport.state(), DragWhilePlaying);
        transport.apply(Command::DragEnd { at_end: false }).unwrap();
        assert_eq!(transport.state(), Playing);
        transport.apply(Command::DragStart).unwrap();
        transport.apply(Command::DragEnd { at_end: true }).unwrap();
        assert_eq!(transport.state(), StopPlaying);
    }

    #[test]
    fn test_player_never_records() {
        let mut transport = Transport::new(Activity::Player);
        assert!(transport.apply(Command::Record).is_err());
        transport.apply(Command::Play).unwrap();
        transport.apply(Command::Play).unwrap();
        assert_eq!(transport.state(), PausePlaying);
        assert!(transport.apply(Command::Record).is_err());
        transport.apply(Command::Stop).unwrap();
        assert_eq!(transport.state(), StopPlaying);
        assert!(transport.apply(Command::Stop).is_err());
    }

    #[test]
    fn test_pipeline_completion() {
        assert_eq!(
            next_state(Activity::Player, Playing, Command::PlaybackFinished),
            Some(StopPlaying)
        );
        assert_eq!(
            next_state(Activity::Player, PausePlaying, Command::PlaybackFinished),
            None
        );
        assert_eq!(
            next_state(
                Activity::Recorder,
                Recording(RecordMode::Overwrite),
                Command::PipelineFailed
            ),
            Some(StopRecording)
        );
    }

    #[test]
    fn test_reset_only_when_idle() {
        assert_eq!(
            next_state(Activity::Recorder, StopRecording, Command::Reset),
            Some(Initialized)
        );
        assert_eq!(
            next_state(Activity::Recorder, Recording(RecordMode::Append), Command::Reset),
            None
        );
        assert_eq!(next_state(Activity::Recorder, Playing, Command::Reset), None);
    }
}
